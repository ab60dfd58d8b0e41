//! Read-only access to hierarchical trace containers.
//!
//! Recorded traces are HDF5 files: a tree of groups and datasets, each carrying named attributes.
//! The [`TraceContainer`] trait captures the handful of operations the trace decoders need, so
//! that decoding does not depend on a particular storage library. Two implementations exist:
//!
//! - [`MemoryContainer`], an in-memory tree used by tests and by callers that already hold the data;
//! - `Hdf5Container` (feature `hdf5`), backed by the `hdf5` crate.
//!
//! Node paths are absolute and slash-separated, e.g. `/Data/RealNeuron-1`.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2};

use crate::error::{LcgError, LcgResult};

/// Value of a node attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
    FloatArray(Vec<f64>),
    Matrix(Array2<f64>),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            AttrValue::FloatArray(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// Integer value; floats are accepted when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttrValue::FloatArray(v) if v.len() == 1 && v[0].fract() == 0.0 => Some(v[0] as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Matrix view of array-valued attributes. A flat array becomes a single row.
    pub fn as_matrix(&self) -> Option<Array2<f64>> {
        match self {
            AttrValue::Matrix(m) => Some(m.clone()),
            AttrValue::FloatArray(v) => Array2::from_shape_vec((1, v.len()), v.clone()).ok(),
            _ => None,
        }
    }
}

pub trait TraceContainer {
    /// Where the container was read from, reported in errors.
    fn source(&self) -> &Path;
    fn has_node(&self, path: &str) -> bool;
    /// Names of the direct children of a group, in storage order.
    fn children(&self, path: &str) -> LcgResult<Vec<String>>;
    fn attributes(&self, path: &str) -> LcgResult<IndexMap<String, AttrValue>>;
    fn read_vector(&self, path: &str) -> LcgResult<Array1<f64>>;
    fn read_matrix(&self, path: &str) -> LcgResult<Array2<f64>>;

    fn missing(&self, path: &str) -> LcgError {
        LcgError::format(self.source(), None, format!("node {} is missing", path))
    }
}

/// Flattens 1-D data, or 2-D data with a singleton dimension.
pub fn into_vector(source: &Path, path: &str, data: ArrayD<f64>) -> LcgResult<Array1<f64>> {
    let shape = data.shape().to_vec();
    match shape.as_slice() {
        [_] => data
            .into_dimensionality::<Ix1>()
            .map_err(|e| LcgError::format(source, None, format!("{}: {}", path, e))),
        [1, _] | [_, 1] => Ok(Array1::from_iter(data.iter().copied())),
        _ => Err(LcgError::format(
            source,
            None,
            format!("{} has shape {:?}, expected a vector", path, shape),
        )),
    }
}

/// 2-D data as is, 1-D data as a single row.
pub fn into_matrix(source: &Path, path: &str, data: ArrayD<f64>) -> LcgResult<Array2<f64>> {
    let shape = data.shape().to_vec();
    let err = |e: ndarray::ShapeError| LcgError::format(source, None, format!("{}: {}", path, e));
    match shape.as_slice() {
        [n] => data.into_shape((1, *n)).map_err(err)?.into_dimensionality::<Ix2>().map_err(err),
        [_, _] => data.into_dimensionality::<Ix2>().map_err(err),
        _ => Err(LcgError::format(
            source,
            None,
            format!("{} has shape {:?}, expected a matrix", path, shape),
        )),
    }
}

#[derive(Debug, Clone)]
enum MemoryNode {
    Group,
    Dataset(ArrayD<f64>),
}

/// In-memory trace container.
///
/// Parent groups are created on demand when a dataset or attribute is added.
///
/// ```
/// use lcg_backend::container::*;
/// use ndarray::array;
///
/// let mut c = MemoryContainer::new("trace.h5");
/// c.add_vector("/Entities/0/Data", array![0., 1., 2.]);
/// c.set_attr("/Info", "version", AttrValue::Int(2));
/// assert_eq!(c.children("/Entities").unwrap(), vec!["0".to_string()]);
/// assert!(c.has_node("/Entities/0"));
/// ```
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    source: PathBuf,
    nodes: IndexMap<String, (MemoryNode, IndexMap<String, AttrValue>)>,
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

impl MemoryContainer {
    pub fn new(source: impl AsRef<Path>) -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert("/".to_string(), (MemoryNode::Group, IndexMap::new()));
        MemoryContainer {
            source: source.as_ref().to_path_buf(),
            nodes,
        }
    }

    pub fn add_group(&mut self, path: &str) -> &mut Self {
        if let Some(parent) = parent_of(path) {
            if !self.nodes.contains_key(parent) {
                self.add_group(parent);
            }
        }
        self.nodes
            .entry(path.to_string())
            .or_insert_with(|| (MemoryNode::Group, IndexMap::new()));
        self
    }

    pub fn add_dataset(&mut self, path: &str, data: ArrayD<f64>) -> &mut Self {
        if let Some(parent) = parent_of(path) {
            self.add_group(parent);
        }
        match self.nodes.get_mut(path) {
            Some(node) => node.0 = MemoryNode::Dataset(data),
            None => {
                self.nodes
                    .insert(path.to_string(), (MemoryNode::Dataset(data), IndexMap::new()));
            }
        }
        self
    }

    pub fn add_vector(&mut self, path: &str, data: Array1<f64>) -> &mut Self {
        self.add_dataset(path, data.into_dyn())
    }

    pub fn add_matrix(&mut self, path: &str, data: Array2<f64>) -> &mut Self {
        self.add_dataset(path, data.into_dyn())
    }

    /// Sets an attribute, creating `path` as a group if it does not exist yet.
    pub fn set_attr(&mut self, path: &str, name: &str, value: AttrValue) -> &mut Self {
        if !self.nodes.contains_key(path) {
            self.add_group(path);
        }
        if let Some((_, attrs)) = self.nodes.get_mut(path) {
            attrs.insert(name.to_string(), value);
        }
        self
    }

    fn dataset(&self, path: &str) -> LcgResult<&ArrayD<f64>> {
        match self.nodes.get(path) {
            Some((MemoryNode::Dataset(data), _)) => Ok(data),
            Some((MemoryNode::Group, _)) => Err(LcgError::format(
                &self.source,
                None,
                format!("{} is a group, not a dataset", path),
            )),
            None => Err(self.missing(path)),
        }
    }
}

impl TraceContainer for MemoryContainer {
    fn source(&self) -> &Path {
        &self.source
    }

    fn has_node(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> LcgResult<Vec<String>> {
        match self.nodes.get(path) {
            Some((MemoryNode::Group, _)) => Ok(self
                .nodes
                .keys()
                .filter(|key| parent_of(key) == Some(path))
                .filter_map(|key| key.rsplit('/').next())
                .map(str::to_string)
                .collect()),
            Some((MemoryNode::Dataset(_), _)) => Err(LcgError::format(
                &self.source,
                None,
                format!("{} is a dataset, not a group", path),
            )),
            None => Err(self.missing(path)),
        }
    }

    fn attributes(&self, path: &str) -> LcgResult<IndexMap<String, AttrValue>> {
        self.nodes
            .get(path)
            .map(|(_, attrs)| attrs.clone())
            .ok_or_else(|| self.missing(path))
    }

    fn read_vector(&self, path: &str) -> LcgResult<Array1<f64>> {
        into_vector(&self.source, path, self.dataset(path)?.clone())
    }

    fn read_matrix(&self, path: &str) -> LcgResult<Array2<f64>> {
        into_matrix(&self.source, path, self.dataset(path)?.clone())
    }
}
