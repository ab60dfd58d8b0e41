#![cfg(feature = "hdf5")]

use std::fs;
use std::path::{Path, PathBuf};

use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use lcg_backend::*;
use ndarray::{array, Array1, Array2};

const DT: f64 = 0.25;
const TEND: f64 = 1.0;

fn samples(offset: f64) -> Array1<f64> {
    Array1::from_iter((0..4).map(|i| offset + i as f64))
}

fn metadata() -> Array2<f64> {
    array![[1., 1., 0., 0., 0., 0., 0., 0., 0., 0., 0., 1.]]
}

fn vector(group: &Group, name: &str, data: Array1<f64>) {
    group.new_dataset_builder().with_data(&data).create(name).unwrap();
}

fn float_attr(group: &Group, name: &str, value: f64) {
    group.new_attr::<f64>().create(name).unwrap().write_scalar(&value).unwrap();
}

fn text_attr(group: &Group, name: &str, value: &str) {
    let value: VarLenUnicode = value.parse().unwrap();
    group.new_attr::<VarLenUnicode>().create(name).unwrap().write_scalar(&value).unwrap();
}

fn legacy_timing(file: &File) {
    let props = file.create_group("Misc").unwrap().create_group("Simulation_properties").unwrap();
    float_attr(&props, "dt", DT);
    float_attr(&props, "tend", TEND);
}

fn legacy_data(file: &File) -> Group {
    let data = file.create_group("Data").unwrap();
    vector(&data, "H5Recorder-0", samples(0.0));
    vector(&data, "RealNeuron-1", samples(-65.0));
    vector(&data, "Waveform-2", samples(100.0));
    data
}

fn version0(dir: &Path) -> PathBuf {
    let path = dir.join("v0.h5");
    let file = File::create(&path).unwrap();
    legacy_data(&file);
    file.create_group("Metadata")
        .unwrap()
        .new_dataset_builder()
        .with_data(&metadata())
        .create("Waveform-2")
        .unwrap();
    legacy_timing(&file);
    path
}

fn version1(dir: &Path) -> PathBuf {
    let path = dir.join("v1.h5");
    let file = File::create(&path).unwrap();
    let data = legacy_data(&file);
    let waveform = data.dataset("Waveform-2").unwrap();
    waveform
        .new_attr_builder()
        .with_data(&metadata())
        .create("Metadata_Waveform")
        .unwrap();
    let units: VarLenUnicode = "pA".parse().unwrap();
    waveform
        .new_attr::<VarLenUnicode>()
        .create("Units")
        .unwrap()
        .write_scalar(&units)
        .unwrap();
    legacy_timing(&file);
    path
}

fn version2(dir: &Path) -> PathBuf {
    let path = dir.join("v2.h5");
    let file = File::create(&path).unwrap();
    let info = file.create_group("Info").unwrap();
    // the recorder writes the version as an unsigned byte
    info.new_attr::<u8>().create("version").unwrap().write_scalar(&2u8).unwrap();
    float_attr(&info, "dt", DT);
    float_attr(&info, "tend", TEND);

    let entities = file.create_group("Entities").unwrap();
    for (id, offset) in [(0, 0.0), (1, -65.0), (2, 100.0)] {
        let entity = entities.create_group(&id.to_string()).unwrap();
        vector(&entity, "Data", samples(offset));
    }
    let waveform = entities.group("2").unwrap();
    waveform.new_dataset_builder().with_data(&metadata()).create("Metadata").unwrap();
    text_attr(&waveform, "Name", "Waveform");
    text_attr(&waveform, "Units", "pA");
    let neuron = entities.group("1").unwrap();
    text_attr(&neuron, "Name", "RealNeuron");
    neuron.new_attr::<bool>().create("Calibrated").unwrap().write_scalar(&true).unwrap();
    path
}

#[test]
fn files_of_every_version_decode_to_the_same_channels() {
    let dir = tempfile::tempdir().unwrap();
    let paths = [version0(dir.path()), version1(dir.path()), version2(dir.path())];
    let traces: Vec<TraceFile> = paths.iter().map(|p| TraceReader::open(p).unwrap()).collect();

    let versions: Vec<FormatVersion> = traces.iter().map(|t| t.version).collect();
    assert_eq!(versions, vec![FormatVersion::V0, FormatVersion::V1, FormatVersion::V2]);
    for trace in &traces {
        assert_eq!(trace.channel_ids(), vec![0, 1, 2]);
        assert_eq!(trace.dt, DT);
        assert_eq!(trace.tend, TEND);
        assert!(trace.is_consistent());
        assert_eq!(trace.channel(1).unwrap().data, samples(-65.0));
        let stimulus = trace.channel(2).unwrap().stimulus_segments().unwrap().unwrap();
        assert_eq!(stimulus, vec![StimulusSegment::constant(1.0, 0.0).with_seed(0)]);
    }
    assert_eq!(traces[1].channel(2).unwrap().units(), Some("pA"));
    assert_eq!(traces[2].channel(2).unwrap().units(), Some("pA"));
    assert_eq!(traces[2].channel(2).unwrap().name, "Waveform");
}

#[test]
fn boolean_and_unsigned_attributes_read_as_integers() {
    let dir = tempfile::tempdir().unwrap();
    let container = Hdf5Container::open(version2(dir.path())).unwrap();

    let info = container.attributes("/Info").unwrap();
    assert_eq!(info["version"], AttrValue::Int(2));
    assert_eq!(info["dt"], AttrValue::Float(DT));
    let neuron = container.attributes("/Entities/1").unwrap();
    assert_eq!(neuron["Calibrated"], AttrValue::Int(1));
    assert_eq!(neuron["Name"], AttrValue::Text("RealNeuron".to_string()));

    let trace = TraceReader::read(&container).unwrap();
    assert_eq!(trace.channel(1).unwrap().attributes["calibrated"], AttrValue::Int(1));
}

#[test]
fn container_navigation() {
    let dir = tempfile::tempdir().unwrap();
    let path = version0(dir.path());
    let container = Hdf5Container::open(&path).unwrap();

    assert_eq!(container.source(), path.as_path());
    assert!(container.has_node("/"));
    assert!(container.has_node("/Metadata/Waveform-2"));
    assert!(!container.has_node("/Events"));
    assert_eq!(
        container.children("/Data").unwrap(),
        vec!["H5Recorder-0", "RealNeuron-1", "Waveform-2"]
    );
    assert_eq!(container.read_matrix("/Metadata/Waveform-2").unwrap(), metadata());
    assert_eq!(container.read_vector("/Metadata/Waveform-2").unwrap().len(), 12);
    assert!(container.read_vector("/Data/Missing-9").is_err());
}

#[test]
fn unreadable_paths_are_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.h5");
    assert_eq!(TraceReader::open(&missing).unwrap_err().kind(), ErrorKind::Io);
    assert_eq!(TraceReader::open(dir.path()).unwrap_err().kind(), ErrorKind::Io);

    let text = dir.path().join("notes.h5");
    fs::write(&text, "not an hdf5 file").unwrap();
    assert_eq!(TraceReader::open(&text).unwrap_err().kind(), ErrorKind::Io);
}
