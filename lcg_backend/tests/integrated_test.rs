use std::fs;

use lcg_backend::stimulus::params;
use lcg_backend::*;
use ndarray::{array, Array1};
use proptest::prelude::*;

fn pulse_protocol() -> Vec<StimulusSegment> {
    vec![
        StimulusSegment::constant(1.0, 0.0),
        StimulusSegment::new(
            5.0,
            TypeCode::Waveform(WaveformKind::PulseTrain),
            params([4000.0, 10.0, 0.001, 0.0, 0.0]),
        ),
        StimulusSegment::constant(1.0, 0.0),
    ]
}

#[test]
fn pulse_train_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulses.stim");
    let mut encoder = StimulusEncoder::with_source(RngSeedSource::from_seed(3));

    let total = encoder.encode(&pulse_protocol(), &path).unwrap();
    assert_eq!(total, 7.0);

    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in &lines {
        assert_eq!(line.split_whitespace().count(), 12, "{}", line);
    }
    assert!(lines[1].starts_with("5\t8\t4000\t10\t0.001\t0\t0\t0\t"), "{}", lines[1]);

    let parsed = parse_stim_file(&path).unwrap();
    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[1].type_code, TypeCode::Waveform(WaveformKind::PulseTrain));
}

#[test]
fn negative_duration_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.stim");
    let mut segments = pulse_protocol();
    segments[2].duration = -1.0;

    let err = StimulusEncoder::new().encode(&segments, &path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!path.exists());
}

#[test]
fn shared_seed_reproduces_background() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = (dir.path().join("a.stim"), dir.path().join("b.stim"));
    let background = |seed| {
        vec![
            StimulusSegment::constant(0.5, 0.0),
            StimulusSegment::ornstein_uhlenbeck(2.0, 0.5, 0.1, 5.0, Some(seed)),
        ]
    };
    StimulusEncoder::with_source(RngSeedSource::from_seed(1))
        .encode(&background(1234), &a)
        .unwrap();
    StimulusEncoder::with_source(RngSeedSource::from_seed(2))
        .encode(&background(1234), &b)
        .unwrap();
    let second_line = |path| fs::read_to_string(path).unwrap().lines().nth(1).unwrap().to_string();
    assert_eq!(second_line(&a), second_line(&b));
}

fn neuron() -> RealNeuronAttrs {
    RealNeuronAttrs {
        device_file: "/dev/comedi0".to_string(),
        input_subdevice: 0,
        output_subdevice: 1,
        read_channel: 0,
        write_channel: 0,
        input_conversion_factor: 20.0,
        output_conversion_factor: 0.0025,
        input_range: InputRange::PlusMinusTen,
        reference: GroundReference::Grse,
        spike_threshold: -20.0,
        initial_value: -65.0,
        kernel_file: Some("kernel.dat".to_string()),
        hold_last_value: false,
        adaptive_threshold: false,
    }
}

#[test]
fn recorder_and_neuron_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.xml");

    let mut doc = ConfigDocument::new(20000.0, 1.1).unwrap();
    doc.add_recorder(0, &[], true).unwrap();
    doc.add_real_neuron(1, &[0], neuron()).unwrap();

    let err = doc.add_conductance_stimulus(1, &[0], 0.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!doc.is_written());

    doc.write(&path).unwrap();
    assert!(doc.is_written());

    let parsed = ConfigDocument::parse(&path).unwrap();
    assert_eq!(parsed.sampling_rate(), 20000.0);
    assert_eq!(parsed.duration(), 1.1);
    assert_eq!(parsed.entities().keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(parsed.entity(1), doc.entity(1));
}

#[test]
fn dangling_connection_leaves_document_unwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.xml");

    let mut doc = ConfigDocument::new(20000.0, 1.1).unwrap();
    doc.add_recorder(0, &[], false).unwrap();
    doc.add_waveform(2, &[1], "current.stim", "pA").unwrap();

    let err = doc.write(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("entity 2"), "{}", err);
    assert!(!doc.is_written());
    assert!(!path.exists());

    // forward references are resolved at write time
    doc.add_real_neuron(1, &[0], neuron()).unwrap();
    doc.write(&path).unwrap();
}

#[test]
fn written_documents_are_frozen() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = ConfigDocument::new(20000.0, 1.0).unwrap();
    doc.add_recorder(0, &[], true).unwrap();
    doc.write(&dir.path().join("a.xml")).unwrap();

    let err = doc.add_recorder(5, &[], true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    let err = doc.write(&dir.path().join("b.xml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(!dir.path().join("b.xml").exists());
}

const DT: f64 = 0.25;
const TEND: f64 = 1.0;

fn samples(offset: f64) -> Array1<f64> {
    Array1::from_iter((0..4).map(|i| offset + i as f64))
}

fn version0() -> MemoryContainer {
    let mut c = MemoryContainer::new("v0.h5");
    c.add_vector("/Data/H5Recorder-0", samples(0.0))
        .add_vector("/Data/RealNeuron-1", samples(-65.0))
        .add_vector("/Data/Waveform-2", samples(100.0))
        .add_matrix("/Metadata/Waveform-2", array![[1., 1., 0., 0., 0., 0., 0., 0., 0., 0., 0., 1.]])
        .set_attr("/Misc/Simulation_properties", "dt", AttrValue::Float(DT))
        .set_attr("/Misc/Simulation_properties", "tend", AttrValue::Float(TEND));
    c
}

fn version1() -> MemoryContainer {
    let mut c = MemoryContainer::new("v1.h5");
    c.add_vector("/Data/H5Recorder-0", samples(0.0))
        .add_vector("/Data/RealNeuron-1", samples(-65.0))
        .add_vector("/Data/Waveform-2", samples(100.0))
        .set_attr(
            "/Data/Waveform-2",
            "Metadata_Waveform",
            AttrValue::Matrix(array![[1., 1., 0., 0., 0., 0., 0., 0., 0., 0., 0., 1.]]),
        )
        .set_attr("/Data/Waveform-2", "Units", AttrValue::Text("pA".to_string()))
        .set_attr("/Misc/Simulation_properties", "dt", AttrValue::Float(DT))
        .set_attr("/Misc/Simulation_properties", "tend", AttrValue::Float(TEND));
    c
}

fn version2() -> MemoryContainer {
    let mut c = MemoryContainer::new("v2.h5");
    c.set_attr("/Info", "version", AttrValue::Int(2))
        .set_attr("/Info", "dt", AttrValue::Float(DT))
        .set_attr("/Info", "tend", AttrValue::Float(TEND))
        .add_vector("/Entities/0/Data", samples(0.0))
        .add_vector("/Entities/1/Data", samples(-65.0))
        .add_vector("/Entities/2/Data", samples(100.0))
        .add_matrix(
            "/Entities/2/Metadata",
            array![[1., 1., 0., 0., 0., 0., 0., 0., 0., 0., 0., 1.]],
        )
        .set_attr("/Entities/2", "Name", AttrValue::Text("Waveform".to_string()))
        .set_attr("/Entities/2", "Units", AttrValue::Text("pA".to_string()));
    c
}

#[test]
fn versions_decode_to_the_same_channels() {
    let traces: Vec<TraceFile> = [version0(), version1(), version2()]
        .iter()
        .map(|c| TraceReader::read(c).unwrap())
        .collect();

    let versions: Vec<FormatVersion> = traces.iter().map(|t| t.version).collect();
    assert_eq!(versions, vec![FormatVersion::V0, FormatVersion::V1, FormatVersion::V2]);

    for trace in &traces {
        assert_eq!(trace.channel_ids(), vec![0, 1, 2]);
        assert_eq!(trace.dt, DT);
        assert_eq!(trace.tend, TEND);
        assert!(trace.is_consistent());
        for chan in &trace.channels {
            assert_eq!(chan.data.len(), 4);
        }
        let stimulus = trace.channel(2).unwrap().stimulus_segments().unwrap().unwrap();
        assert_eq!(stimulus, vec![StimulusSegment::constant(1.0, 0.0).with_seed(0)]);
    }
    assert_eq!(traces[1].channel(2).unwrap().units(), Some("pA"));
    assert_eq!(traces[2].channel(2).unwrap().units(), Some("pA"));
}

#[test]
fn version2_without_events() {
    let trace = TraceReader::read(&version2()).unwrap();
    assert!(!trace.has_events());
    assert!(trace.events.is_none());
    assert!(!trace.info.contains_key("events"));
    assert_eq!(trace.info["version"], AttrValue::Int(2));
}

#[test]
fn truncated_layouts_are_refused() {
    let mut c = version2();
    c.set_attr("/Info", "version", AttrValue::Int(9));
    assert_eq!(TraceReader::read(&c).unwrap_err().kind(), ErrorKind::Format);

    let c = MemoryContainer::new("empty.h5");
    let err = TraceReader::read(&c).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains("/Data"), "{}", err);
}

fn segment_strategy() -> impl Strategy<Value = StimulusSegment> {
    (0.0f64..100.0, -500.0f64..500.0, proptest::option::of(0u64..50_000)).prop_map(
        |(duration, value, seed)| {
            let segment = StimulusSegment::constant(duration, value);
            match seed {
                Some(seed) => segment.with_seed(seed),
                None => segment,
            }
        },
    )
}

proptest! {
    #[test]
    fn encoded_records_match_segments(segments in proptest::collection::vec(segment_strategy(), 0..20)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.stim");
        let mut encoder = StimulusEncoder::with_source(RngSeedSource::from_seed(11));
        let total = encoder.encode(&segments, &path).unwrap();

        let expected: f64 = segments.iter().map(|s| s.duration).sum();
        prop_assert!((total - expected).abs() < 1e-9);
        let contents = fs::read_to_string(&path).unwrap();
        prop_assert_eq!(contents.lines().count(), segments.len());
        for line in contents.lines() {
            prop_assert_eq!(line.split('\t').count(), 12);
        }
    }
}
