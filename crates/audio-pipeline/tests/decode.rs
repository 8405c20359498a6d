mod common;

use audio_pipeline::{AudioOutputFormat, DecodeConfig, Decoder, Error, SampleFormat};

use common::{write_float_wav, write_sine_wav};

fn collect_all(decoder: &mut Decoder) -> Vec<Vec<f32>> {
    let channels = decoder.output_format().map_or(0, |f| f.channels);
    let mut planes = vec![Vec::new(); channels];
    loop {
        match decoder.decode_next_frame(|frame| {
            for (ch, plane) in planes.iter_mut().enumerate() {
                frame.extend_channel_f32(ch, plane);
            }
        }) {
            Ok(()) => {}
            Err(e) if e.is_end_of_file() => break,
            Err(e) => panic!("decode failed: {e}"),
        }
    }
    planes
}

#[test]
fn passthrough_and_forced_conversion_are_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_float_wav(&dir.path().join("float.wav"), 48_000, 2, 30_000);
    let target = AudioOutputFormat::planar_f32(48_000, 2);

    let mut passthrough = Decoder::default();
    passthrough.configure(target);
    passthrough.open(&input).unwrap();
    assert!(passthrough.is_passthrough());

    let mut converted = Decoder::new(DecodeConfig {
        force_conversion: true,
        ..DecodeConfig::default()
    });
    converted.configure(target);
    converted.open(&input).unwrap();
    assert!(!converted.is_passthrough());

    let a = collect_all(&mut passthrough);
    let b = collect_all(&mut converted);
    assert_eq!(a[0].len(), 30_000);
    assert_eq!(a, b);
}

#[test]
fn end_of_file_repeats_until_seek() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_sine_wav(&dir.path().join("sine.wav"), 44_100, 1, 0.25, 440.0);

    let mut decoder = Decoder::default();
    decoder.configure(AudioOutputFormat::planar_f32(44_100, 1));
    decoder.open(&input).unwrap();
    let planes = collect_all(&mut decoder);
    assert_eq!(planes[0].len(), 11_025);

    for _ in 0..3 {
        let err = decoder.decode_next_frame(|_| ()).unwrap_err();
        assert!(matches!(err, Error::EndOfFile));
    }

    decoder.seek(0.0).unwrap();
    let ts = decoder.decode_next_frame(|f| f.timestamp()).unwrap();
    assert_eq!(ts, 0.0);
}

#[test]
fn seek_lands_at_or_before_target() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_sine_wav(&dir.path().join("sine.wav"), 44_100, 2, 2.0, 440.0);

    let mut decoder = Decoder::default();
    decoder.configure(AudioOutputFormat::planar_f32(44_100, 2));
    decoder.open(&input).unwrap();

    for target in [0.5, 1.25, 1.9] {
        decoder.seek(target).unwrap();
        let ts = decoder.decode_next_frame(|f| f.timestamp()).unwrap();
        assert!(ts <= target + 1e-6, "timestamp {ts} after target {target}");
        assert!(ts >= target - 0.1, "timestamp {ts} too far before {target}");
    }
}

#[test]
fn seek_past_end_is_end_of_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_sine_wav(&dir.path().join("sine.wav"), 44_100, 1, 0.5, 440.0);

    let mut decoder = Decoder::default();
    decoder.configure(AudioOutputFormat::planar_f32(44_100, 1));
    decoder.open(&input).unwrap();
    decoder.seek(5.0).unwrap();
    assert!(matches!(
        decoder.decode_next_frame(|_| ()),
        Err(Error::EndOfFile)
    ));
}

#[test]
fn resampling_and_downmix_reach_the_target_format() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_sine_wav(&dir.path().join("sine.wav"), 44_100, 2, 1.0, 440.0);

    let mut decoder = Decoder::default();
    decoder.configure(AudioOutputFormat::new(48_000.0, 1, SampleFormat::I16, false));
    decoder.open(&input).unwrap();
    assert!(!decoder.is_passthrough());

    let mut frames = 0usize;
    let mut last_ts = -1.0;
    loop {
        match decoder.decode_next_frame(|f| {
            assert_eq!(f.channels(), 1);
            assert_eq!(f.sample_rate(), 48_000);
            assert_eq!(f.sample_format(), SampleFormat::I16);
            (f.frames(), f.timestamp())
        }) {
            Ok((n, ts)) => {
                assert!(ts > last_ts);
                last_ts = ts;
                frames += n;
            }
            Err(e) if e.is_end_of_file() => break,
            Err(e) => panic!("decode failed: {e}"),
        }
    }
    assert!((46_500..=48_100).contains(&frames), "got {frames} frames");
}

#[test]
fn probe_reports_stream_properties() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_sine_wav(&dir.path().join("sine.wav"), 22_050, 2, 1.5, 440.0);

    let info = Decoder::probe(&input).unwrap();
    assert_eq!(info.sample_rate, 22_050);
    assert_eq!(info.channels, 2);
    assert_eq!(info.bit_depth, Some(16));
    assert!((info.duration.unwrap() - 1.5).abs() < 1e-3);
    assert!(info.bitrate.is_some());
}

#[test]
fn garbage_input_has_no_stream_info() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noise.wav");
    std::fs::write(&path, b"definitely not a riff file").unwrap();

    let err = Decoder::probe(&path).unwrap_err();
    assert!(matches!(
        err,
        Error::StreamInfoUnavailable(_) | Error::NoAudioStream
    ));
}
