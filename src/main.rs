// main.rs - Example usage: code a synthetic stereo stream and report
use spectral_band_coder::*;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() -> Result<()> {
    env_logger::init();

    println!("{}", version_info());
    println!("======================================\n");

    let config = ModeConfig::new(48000, 240, 2)?;
    let mode = Arc::new(Mode::from_config(&config)?);
    let settings = EncoderSettings::new(120)?;
    let mut encoder = FrameEncoder::new(mode.clone(), settings.clone())?;
    let mut decoder = FrameDecoder::new(mode.clone(), settings.clone())?;

    println!("Band coder initialized:");
    println!("  Sample Rate: {} Hz", config.sample_rate);
    println!("  Channels: {}", mode.channels());
    println!("  Frame Size: {} bins", mode.frame_size());
    println!("  Bands: {} (coded up to bin {})", mode.nb_bands(), mode.coded_bins());
    println!("  Folding from bin {}", mode.pitch_end());
    println!(
        "  Frame budget: {} bytes ({:.1} kbps)",
        settings.bytes_per_frame,
        encoder.bitrate_kbps(config.sample_rate)
    );

    // One second of drifting tonal content
    let frames = (config.sample_rate as usize / mode.frame_size()).max(1);
    let mut stream = Vec::with_capacity(frames * mode.frame_size() * 2);
    for i in 0..frames {
        let peak = 2 + (i * 3) % 60;
        stream.extend(generate_tonal_spectrum(
            mode.frame_size(),
            2,
            &[(peak, 8.0), (peak * 2, 3.0), (peak * 3, 1.0)],
            i as u64,
        ));
    }

    println!("\nEncoding {} frames...", frames);
    let start_time = Instant::now();
    let encoded = encoder.encode_buffer(&stream)?;
    let encoding_time = start_time.elapsed();

    let start_time = Instant::now();
    let mut decoded = Vec::with_capacity(stream.len());
    let mut mismatches = 0;
    for frame in &encoded {
        let out = decoder.decode_frame(&frame.bytes, &frame.bank)?;
        if out.report != frame.report {
            mismatches += 1;
        }
        decoded.extend(out.freq);
    }
    let decoding_time = start_time.elapsed();

    let stats = encoder.stats();
    println!("\nCoding completed:");
    println!("  Encoded {} frames, {} bytes", stats.frames, stats.total_bytes);
    println!("  Budget fill: {:.1}%", stats.fill_ratio() * 100.0);
    println!(
        "  Bands: {} coded, {} folded, {} silent",
        stats.coded_bands, stats.folded_bands, stats.silent_bands
    );
    println!("  Folding on in {} of {} frames", stats.folding_frames, stats.frames);
    println!("  Residual SNR: {:.1} dB", stats.avg_snr);
    println!(
        "  Spectrum SNR: {:.1} dB",
        utils::quality_utils::calculate_snr(&stream, &decoded)
    );
    println!("  Encoding time: {:.2} ms", encoding_time.as_secs_f32() * 1000.0);
    println!("  Decoding time: {:.2} ms", decoding_time.as_secs_f32() * 1000.0);
    if mismatches == 0 {
        println!("  Encoder and decoder agree on every band budget");
    } else {
        println!("  {} frames diverged between encoder and decoder", mismatches);
    }

    // Stereo image of the first frame
    let (left, right): (Vec<f32>, Vec<f32>) = decoded[..mode.frame_size() * 2]
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .unzip();
    println!(
        "\nFirst frame L/R correlation: {:.3}",
        utils::quality_utils::correlation(&left, &right)
    );

    // Modes are immutable and shared between coders on different threads
    println!("\nCoding on 4 threads with one shared mode...");
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mode = mode.clone();
            let settings = settings.clone();
            thread::spawn(move || -> Result<usize> {
                let mut encoder = FrameEncoder::new(mode.clone(), settings)?;
                let freq = generate_noise_spectrum(mode.frame_size(), 2, 1.0 + i as f32, i as u64);
                let frame = encoder.encode_frame(&freq)?;
                Ok(frame.report.coded_bands())
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(coded)) => println!("  Thread {}: {} coded bands", i, coded),
            Ok(Err(e)) => println!("  Thread {}: error - {}", i, e),
            Err(_) => println!("  Thread {}: panicked", i),
        }
    }

    println!("\nTesting different layouts...");
    let layouts = [
        ("Narrowband Mono", 8000, 80, 1, 20),
        ("Wideband Stereo", 16000, 160, 2, 60),
        ("Fullband 5 ms", 48000, 120, 2, 80),
        ("CD Rate Long Frame", 44100, 512, 2, 300),
    ];
    for (name, rate, frame_size, channels, bytes) in layouts {
        let config = ModeConfig::new(rate, frame_size, channels)?;
        let mut test_encoder = FrameEncoder::from_config(&config, EncoderSettings::new(bytes)?)?;
        let freq = generate_noise_spectrum(frame_size, channels, 1.0, 1);
        let start = Instant::now();
        let frame = test_encoder.encode_frame(&freq)?;
        println!(
            "  {}: {} bands, {} of {} bits, {} us",
            name,
            test_encoder.mode().nb_bands(),
            (frame.report.tell + 7) >> 3,
            bytes * 8,
            start.elapsed().as_micros()
        );
    }

    println!("\nPerformance profiling...");
    let mut times = Vec::new();
    for frame in stream.chunks(mode.frame_size() * 2).take(100) {
        let start = Instant::now();
        encoder.encode_frame(frame)?;
        times.push(start.elapsed().as_micros() as f32);
    }
    let average = times.iter().sum::<f32>() / times.len().max(1) as f32;
    println!("  Average: {:.1} us per frame", average);
    println!("  Max: {:.1} us", times.iter().copied().fold(0.0, f32::max));

    #[cfg(not(feature = "profiling"))]
    {
        println!("\nTo run the criterion benchmarks, enable the 'profiling' feature:");
        println!("  cargo bench --features profiling");
    }

    Ok(())
}
