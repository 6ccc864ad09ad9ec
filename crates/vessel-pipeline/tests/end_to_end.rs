//! End-to-end packaging scenarios driving the public facade.

use std::sync::{Arc, Mutex};

use vessel_core::descriptor::{
    AdCueGeneratorParams, BufferCallbackParams, Cuepoint, HlsParams, MpdParams, PackagingParams,
    StreamDescriptor,
};
use vessel_core::error::PackagerError;
use vessel_media::demuxer::adts;
use vessel_pipeline::Packager;

const VTT: &str = "WEBVTT\n\n00:00.000 --> 00:02.000\nfirst cue\n\n00:03.000 --> 00:04.000\nsecond cue\n";

fn adts_fixture(frames: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..frames {
        data.extend(adts::build_frame(4, &[i as u8; 32]));
    }
    data
}

fn text_descriptor(input: &str, output: &str) -> StreamDescriptor {
    StreamDescriptor {
        input: input.into(),
        stream_selector: "text".into(),
        output: output.into(),
        ..Default::default()
    }
}

#[test]
fn mixed_live_and_on_demand_requests_are_rejected_before_construction() {
    let packager = Packager::new();
    let descriptors = vec![
        StreamDescriptor {
            input: "a.mp4".into(),
            stream_selector: "video".into(),
            output: "init.mp4".into(),
            segment_template: "s-$Number$.m4s".into(),
            ..Default::default()
        },
        StreamDescriptor {
            input: "a.mp4".into(),
            stream_selector: "audio".into(),
            output: "a.mp4".into(),
            ..Default::default()
        },
    ];
    let err = packager
        .initialize(&PackagingParams::default(), &descriptors)
        .expect_err("mixed profiles must fail");
    assert!(matches!(err, PackagerError::InvalidArgument(_)));
    assert!(err.to_string().contains("Inconsistent stream descriptor"));
}

#[test]
fn ts_output_with_an_init_segment_is_rejected() {
    let packager = Packager::new();
    let descriptors = vec![StreamDescriptor {
        input: "a.ts".into(),
        stream_selector: "video".into(),
        output: "init.ts".into(),
        segment_template: "s-$Number$.ts".into(),
        ..Default::default()
    }];
    let err = packager
        .initialize(&PackagingParams::default(), &descriptors)
        .expect_err("TS init segment must fail");
    assert!(err.to_string().contains("All TS segments must be self-initializing"));
}

#[test]
fn unknown_language_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.vtt");
    std::fs::write(&input, VTT).unwrap();

    let mut descriptor =
        text_descriptor(input.to_str().unwrap(), dir.path().join("o.vtt").to_str().unwrap());
    descriptor.language = "zz".into();

    let packager = Packager::new();
    let err = packager
        .initialize(&PackagingParams::default(), &[descriptor])
        .expect_err("unknown language must fail");
    assert!(err.to_string().contains("Unknown/invalid language specified: zz"));
}

#[test]
fn initializing_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.vtt");
    std::fs::write(&input, VTT).unwrap();
    let descriptor =
        text_descriptor(input.to_str().unwrap(), dir.path().join("o.vtt").to_str().unwrap());

    let packager = Packager::new();
    packager
        .initialize(&PackagingParams::default(), &[descriptor.clone()])
        .expect("first initialize");
    let err = packager
        .initialize(&PackagingParams::default(), &[descriptor])
        .expect_err("second initialize must fail");
    assert!(err.to_string().contains("Already initialized."));
}

#[test]
fn text_passthrough_copies_the_file_and_updates_the_mpd() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("subs.vtt");
    std::fs::write(&input, VTT).unwrap();
    let output = dir.path().join("subs-out.vtt");
    let mpd_output = dir.path().join("manifest.mpd");

    let params = PackagingParams {
        mpd_params: MpdParams {
            mpd_output: mpd_output.to_str().unwrap().into(),
            ..Default::default()
        },
        output_media_info: true,
        ..Default::default()
    };
    let mut descriptor =
        text_descriptor(input.to_str().unwrap(), output.to_str().unwrap());
    descriptor.language = "en".into();

    let packager = Packager::new();
    packager
        .initialize(&params, &[descriptor])
        .expect("initialize");
    packager.run().expect("run");

    // Byte-for-byte copy.
    assert_eq!(std::fs::read(&output).unwrap(), VTT.as_bytes());

    // The MPD references the passthrough file as a text representation.
    let mpd = std::fs::read_to_string(&mpd_output).unwrap();
    assert!(mpd.contains("contentType=\"text\""));
    assert!(mpd.contains("subs-out.vtt"));
    assert!(mpd.contains("lang=\"eng\""));

    // Media info dump with the sniffed codec and the default text bandwidth.
    let dump = std::fs::read_to_string(dir.path().join("subs-out.vtt.media_info")).unwrap();
    assert!(dump.contains("\"codec\": \"wvtt\""));
    assert!(dump.contains("\"bandwidth\": 256"));
}

#[test]
fn segmented_text_packages_into_hls_playlists() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("subs.vtt");
    std::fs::write(&input, VTT).unwrap();
    let master = dir.path().join("master.m3u8");

    let params = PackagingParams {
        hls_params: HlsParams {
            master_playlist_output: master.to_str().unwrap().into(),
            ..Default::default()
        },
        ..Default::default()
    };
    let descriptor = StreamDescriptor {
        input: input.to_str().unwrap().into(),
        stream_selector: "text".into(),
        segment_template: dir.path().join("text-$Number$.vtt").to_str().unwrap().into(),
        hls_group_id: "subs".into(),
        hls_name: "english".into(),
        hls_playlist_name: "text.m3u8".into(),
        ..Default::default()
    };

    let packager = Packager::new();
    packager.initialize(&params, &[descriptor]).expect("initialize");
    packager.run().expect("run");

    // 6s default segment duration: all cues land in the first segment.
    let first_segment = std::fs::read_to_string(dir.path().join("text-1.vtt")).unwrap();
    assert!(first_segment.starts_with("WEBVTT"));
    assert!(first_segment.contains("first cue"));

    let master_playlist = std::fs::read_to_string(&master).unwrap();
    assert!(master_playlist.starts_with("#EXTM3U"));
    assert!(master_playlist.contains("TYPE=SUBTITLES"));
    assert!(master_playlist.contains("GROUP-ID=\"subs\""));
    assert!(master_playlist.contains("text.m3u8"));

    let media_playlist = std::fs::read_to_string(dir.path().join("text.m3u8")).unwrap();
    assert!(media_playlist.contains("#EXTINF"));
    assert!(media_playlist.contains("text-1.vtt"));
    assert!(media_playlist.ends_with("#EXT-X-ENDLIST\n"));
}

#[test]
fn segmented_text_with_mpd_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("subs.vtt");
    std::fs::write(&input, VTT).unwrap();

    let params = PackagingParams {
        mpd_params: MpdParams {
            mpd_output: dir.path().join("m.mpd").to_str().unwrap().into(),
            ..Default::default()
        },
        ..Default::default()
    };
    let descriptor = StreamDescriptor {
        input: input.to_str().unwrap().into(),
        stream_selector: "text".into(),
        segment_template: dir.path().join("text-$Number$.vtt").to_str().unwrap().into(),
        ..Default::default()
    };

    let packager = Packager::new();
    let err = packager
        .initialize(&params, &[descriptor])
        .expect_err("must fail");
    assert!(err
        .to_string()
        .contains("Cannot create text output for MPD with segment output."));
}

#[test]
fn webvtt_to_mp4_runs_the_mp4_text_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("subs.vtt");
    std::fs::write(&input, VTT).unwrap();
    let output = dir.path().join("subs.mp4");
    let mpd_output = dir.path().join("m.mpd");

    let params = PackagingParams {
        mpd_params: MpdParams {
            mpd_output: mpd_output.to_str().unwrap().into(),
            ..Default::default()
        },
        ..Default::default()
    };
    let descriptor = StreamDescriptor {
        input: input.to_str().unwrap().into(),
        stream_selector: "text".into(),
        output: output.to_str().unwrap().into(),
        output_format: "mp4".into(),
        ..Default::default()
    };

    let packager = Packager::new();
    packager.initialize(&params, &[descriptor]).expect("initialize");
    packager.run().expect("run");

    // The output carries boxed cue samples.
    let bytes = std::fs::read(&output).unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("vttc"));
    assert!(text.contains("first cue"));

    let mpd = std::fs::read_to_string(&mpd_output).unwrap();
    assert!(mpd.contains("contentType=\"text\""));
}

#[test]
fn segmented_packed_audio_round_trips_and_flushes_the_mpd() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tone.aac");
    let fixture = adts_fixture(50);
    std::fs::write(&input, &fixture).unwrap();
    let mpd_output = dir.path().join("audio.mpd");

    let params = PackagingParams {
        mpd_params: MpdParams {
            mpd_output: mpd_output.to_str().unwrap().into(),
            ..Default::default()
        },
        ..Default::default()
    };
    let descriptor = StreamDescriptor {
        input: input.to_str().unwrap().into(),
        stream_selector: "audio".into(),
        segment_template: dir.path().join("tone-$Number$.aac").to_str().unwrap().into(),
        bandwidth: 128_000,
        ..Default::default()
    };

    let packager = Packager::new();
    packager.initialize(&params, &[descriptor]).expect("initialize");
    packager.run().expect("run");

    // ~1.2s of audio fits in one 6s segment, byte for byte.
    assert_eq!(std::fs::read(dir.path().join("tone-1.aac")).unwrap(), fixture);

    let mpd = std::fs::read_to_string(&mpd_output).unwrap();
    assert!(mpd.contains("type=\"dynamic\""));
    assert!(mpd.contains("contentType=\"audio\""));
    assert!(mpd.contains("bandwidth=\"128000\""));
    assert!(mpd.contains("tone-$Number$.aac"));
}

#[test]
fn cue_points_align_segments_across_two_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let input_a = dir.path().join("a.aac");
    let input_b = dir.path().join("b.aac");
    // ~1.4 seconds of audio each, comfortably past the 0.5s cue.
    std::fs::write(&input_a, adts_fixture(60)).unwrap();
    std::fs::write(&input_b, adts_fixture(60)).unwrap();

    let params = PackagingParams {
        ad_cue_generator_params: AdCueGeneratorParams {
            cue_points: vec![Cuepoint {
                start_time_in_seconds: 0.5,
                duration_in_seconds: 0.0,
            }],
        },
        ..Default::default()
    };
    let descriptors = vec![
        StreamDescriptor {
            input: input_a.to_str().unwrap().into(),
            stream_selector: "audio".into(),
            segment_template: dir.path().join("a-$Number$.aac").to_str().unwrap().into(),
            ..Default::default()
        },
        StreamDescriptor {
            input: input_b.to_str().unwrap().into(),
            stream_selector: "audio".into(),
            segment_template: dir.path().join("b-$Number$.aac").to_str().unwrap().into(),
            ..Default::default()
        },
    ];

    let packager = Packager::new();
    packager.initialize(&params, &descriptors).expect("initialize");
    // Both chains must rendezvous on the shared cue and still finish.
    packager.run().expect("run");

    // The cue at 0.5s forces a boundary in both representations.
    assert!(dir.path().join("a-1.aac").exists());
    assert!(dir.path().join("a-2.aac").exists());
    assert!(dir.path().join("b-1.aac").exists());
    assert!(dir.path().join("b-2.aac").exists());
}

#[test]
fn live_packed_audio_writes_segments_from_the_template() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tone.aac");
    // ~7 seconds so the 6s default segment duration produces two segments.
    std::fs::write(&input, adts_fixture(300)).unwrap();

    let descriptor = StreamDescriptor {
        input: input.to_str().unwrap().into(),
        stream_selector: "audio".into(),
        segment_template: dir.path().join("seg-$Number$.aac").to_str().unwrap().into(),
        ..Default::default()
    };

    let packager = Packager::new();
    packager
        .initialize(&PackagingParams::default(), &[descriptor])
        .expect("initialize");
    packager.run().expect("run");

    assert!(dir.path().join("seg-1.aac").exists());
    assert!(dir.path().join("seg-2.aac").exists());
}

#[test]
fn buffer_callbacks_replace_file_io() {
    let input_content = Arc::new(Mutex::new(Some(VTT.as_bytes().to_vec())));
    let writes: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

    let input_clone = input_content.clone();
    let writes_clone = writes.clone();
    let params = PackagingParams {
        buffer_callback_params: BufferCallbackParams {
            read_func: Some(Arc::new(move |name: &str, buf: &mut [u8]| {
                assert_eq!(name, "subs.vtt");
                let mut guard = input_clone.lock().unwrap();
                match guard.take() {
                    Some(data) => {
                        buf[..data.len()].copy_from_slice(&data);
                        data.len() as i64
                    }
                    None => {
                        // End of this read session; re-arm for the next one.
                        *guard = Some(VTT.as_bytes().to_vec());
                        0
                    }
                }
            })),
            write_func: Some(Arc::new(move |name: &str, data: &[u8]| {
                writes_clone
                    .lock()
                    .unwrap()
                    .push((name.to_string(), data.to_vec()));
                data.len() as i64
            })),
        },
        mpd_params: MpdParams {
            mpd_output: "manifest.mpd".into(),
            ..Default::default()
        },
        ..Default::default()
    };
    // Input and output are names, not paths: the callbacks own the bytes.
    let descriptor = text_descriptor("subs.vtt", "subs-out.vtt");

    let packager = Packager::new();
    packager.initialize(&params, &[descriptor]).expect("initialize");
    packager.run().expect("run");

    let writes = writes.lock().unwrap();
    let copied = writes
        .iter()
        .find(|(name, _)| name == "subs-out.vtt")
        .expect("output went through the write callback");
    assert_eq!(copied.1, VTT.as_bytes());
    assert!(writes.iter().any(|(name, _)| name == "manifest.mpd"));
}
