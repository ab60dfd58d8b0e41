//! [`TraceContainer`] backed by an HDF5 file.
//!
//! Only compiled with the `hdf5` feature, which needs the system HDF5 library.

use std::path::{Path, PathBuf};

use hdf5::types::{TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Attribute, File, Location};
use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use tracing::debug;

use crate::container::{into_matrix, into_vector, AttrValue, TraceContainer};
use crate::error::{LcgError, LcgResult};

/// An HDF5 file opened read-only. The handle is closed when the container is dropped.
pub struct Hdf5Container {
    source: PathBuf,
    file: File,
}

impl Hdf5Container {
    pub fn open(path: impl AsRef<Path>) -> LcgResult<Self> {
        let source = path.as_ref().to_path_buf();
        if !source.is_file() {
            return Err(LcgError::io(
                &source,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such trace file"),
            ));
        }
        let file = File::open(&source).map_err(|e| {
            LcgError::io(
                &source,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            )
        })?;
        Ok(Hdf5Container { source, file })
    }

    fn fail(&self, path: &str, err: hdf5::Error) -> LcgError {
        LcgError::format(&self.source, None, format!("{}: {}", path, err))
    }

    fn location(&self, path: &str) -> LcgResult<Location> {
        if let Ok(group) = self.file.group(path) {
            return Ok(Location::clone(&group));
        }
        match self.file.dataset(path) {
            Ok(dataset) => Ok(Location::clone(&dataset)),
            Err(_) => Err(self.missing(path)),
        }
    }

    fn read_attr(&self, path: &str, attr: &Attribute) -> LcgResult<Option<AttrValue>> {
        let err = |e| self.fail(path, e);
        let descriptor = attr.dtype().and_then(|t| t.to_descriptor()).map_err(err)?;
        let value = match descriptor {
            TypeDescriptor::Integer(_) if attr.is_scalar() => {
                AttrValue::Int(attr.read_scalar::<i64>().map_err(err)?)
            }
            TypeDescriptor::Unsigned(_) if attr.is_scalar() => {
                let value = attr.read_scalar::<u64>().map_err(err)?;
                let value = i64::try_from(value).map_err(|_| {
                    LcgError::format(&self.source, None, format!("{}: {} overflows i64", path, value))
                })?;
                AttrValue::Int(value)
            }
            // HDF5 stores booleans as an enum, which does not convert to integers
            TypeDescriptor::Boolean if attr.is_scalar() => {
                AttrValue::Int(attr.read_scalar::<bool>().map_err(err)? as i64)
            }
            TypeDescriptor::Float(_) if attr.is_scalar() => {
                AttrValue::Float(attr.read_scalar::<f64>().map_err(err)?)
            }
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) | TypeDescriptor::Float(_) => {
                if attr.ndim() == 2 {
                    let data = attr.read_dyn::<f64>().map_err(err)?;
                    AttrValue::Matrix(into_matrix(&self.source, path, data)?)
                } else {
                    AttrValue::FloatArray(attr.read_raw::<f64>().map_err(err)?)
                }
            }
            TypeDescriptor::VarLenUnicode => {
                AttrValue::Text(attr.read_scalar::<VarLenUnicode>().map_err(err)?.as_str().to_string())
            }
            TypeDescriptor::VarLenAscii => {
                AttrValue::Text(attr.read_scalar::<VarLenAscii>().map_err(err)?.as_str().to_string())
            }
            other => {
                debug!(path, ?other, "skipping attribute of unsupported type");
                return Ok(None);
            }
        };
        Ok(Some(value))
    }
}

impl TraceContainer for Hdf5Container {
    fn source(&self) -> &Path {
        &self.source
    }

    fn has_node(&self, path: &str) -> bool {
        path == "/" || self.file.link_exists(path)
    }

    fn children(&self, path: &str) -> LcgResult<Vec<String>> {
        let group = self.file.group(path).map_err(|_| self.missing(path))?;
        group.member_names().map_err(|e| self.fail(path, e))
    }

    fn attributes(&self, path: &str) -> LcgResult<IndexMap<String, AttrValue>> {
        let location = self.location(path)?;
        let mut attrs = IndexMap::new();
        for name in location.attr_names().map_err(|e| self.fail(path, e))? {
            let attr = location.attr(&name).map_err(|e| self.fail(path, e))?;
            if let Some(value) = self.read_attr(&format!("{}@{}", path, name), &attr)? {
                attrs.insert(name, value);
            }
        }
        Ok(attrs)
    }

    fn read_vector(&self, path: &str) -> LcgResult<Array1<f64>> {
        let dataset = self.file.dataset(path).map_err(|_| self.missing(path))?;
        let data = dataset.read_dyn::<f64>().map_err(|e| self.fail(path, e))?;
        into_vector(&self.source, path, data)
    }

    fn read_matrix(&self, path: &str) -> LcgResult<Array2<f64>> {
        let dataset = self.file.dataset(path).map_err(|_| self.missing(path))?;
        let data = dataset.read_dyn::<f64>().map_err(|e| self.fail(path, e))?;
        into_matrix(&self.source, path, data)
    }
}
