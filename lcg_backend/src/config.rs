//! The config module assembles configuration documents: the graph of entities, and the signal
//! routing between them, that the external executable instantiates for a trial.
//!
//! ## Overview
//!
//! A [`ConfigDocument`] holds the sampling rate, the trial duration and an ordered collection of
//! [`Entity`] nodes keyed by id. Its behavior is defined by the [`ConfigGraph`] trait through
//! default implementations, on top of a handful of field accessors.
//!
//! ## Lifecycle
//!
//! A document starts in [`DocumentState::Building`]. Entities are appended with
//! [`ConfigGraph::add_entity`] (or one of the typed `add_*` shortcuts) in any order: a connection may
//! point to an entity added later. [`ConfigGraph::write`] checks that every connection resolves,
//! serializes the document and moves it to [`DocumentState::Written`], after which it can no longer
//! be changed or written again.
//!
//! ## Serialized form
//!
//! ```xml
//! <lcg>
//!   <simulation>
//!     <rate>20000</rate>
//!     <tend>1.1</tend>
//!   </simulation>
//!   <entities>
//!     <entity>
//!       <name>RealNeuron</name>
//!       <id>1</id>
//!       <parameters>
//!         <deviceFile>/dev/comedi0</deviceFile>
//!         ...
//!       </parameters>
//!       <connections>0</connections>
//!     </entity>
//!   </entities>
//! </lcg>
//! ```

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, info};

use crate::entity::*;
use crate::error::{LcgError, LcgResult, ValidationError};
use crate::utils::format_number;

pub(crate) mod sealed {
    use indexmap::IndexMap;

    use super::DocumentState;
    use crate::entity::Entity;

    /// Mutable field access, reachable only from inside the crate.
    pub trait DocumentStorage {
        fn entities_(&mut self) -> &mut IndexMap<u32, Entity>;
        fn state_(&mut self) -> &mut DocumentState;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentState {
    Building,
    /// Terminal state, holding where the document was written (or read from).
    Written(PathBuf),
}

/// This trait defines the behavior of the [`ConfigDocument`] struct through default trait implementations.
///
/// Trait methods are classified into the following categories:
/// 1. Field methods, which implementors supply:
///     - [`entities`], [`sampling_rate`], [`duration`], [`state`]
///     - the mutable accessors of the crate-private storage supertrait, so that a document can only
///       change through the checked methods below
/// 2. Graph editing, only valid while the document is being built:
///     - [`add_entity`] and the typed shortcuts [`add_recorder`], [`add_real_neuron`],
///       [`add_waveform`], [`add_conductance_stimulus`], [`add_nmda_conductance_stimulus`],
///       [`add_ornstein_uhlenbeck`]
/// 3. Queries: [`has_entity`], [`entity`], [`is_written`], [`validate_ids`], [`validate_connections`]
/// 4. Serialization: [`to_xml`], [`write`]
///
/// [`entities`]: ConfigGraph::entities
/// [`sampling_rate`]: ConfigGraph::sampling_rate
/// [`duration`]: ConfigGraph::duration
/// [`state`]: ConfigGraph::state
/// [`add_entity`]: ConfigGraph::add_entity
/// [`add_recorder`]: ConfigGraph::add_recorder
/// [`add_real_neuron`]: ConfigGraph::add_real_neuron
/// [`add_waveform`]: ConfigGraph::add_waveform
/// [`add_conductance_stimulus`]: ConfigGraph::add_conductance_stimulus
/// [`add_nmda_conductance_stimulus`]: ConfigGraph::add_nmda_conductance_stimulus
/// [`add_ornstein_uhlenbeck`]: ConfigGraph::add_ornstein_uhlenbeck
/// [`has_entity`]: ConfigGraph::has_entity
/// [`entity`]: ConfigGraph::entity
/// [`is_written`]: ConfigGraph::is_written
/// [`validate_ids`]: ConfigGraph::validate_ids
/// [`validate_connections`]: ConfigGraph::validate_connections
/// [`to_xml`]: ConfigGraph::to_xml
/// [`write`]: ConfigGraph::write
pub trait ConfigGraph: sealed::DocumentStorage {
    // FIELD methods
    fn entities(&self) -> &IndexMap<u32, Entity>;
    fn sampling_rate(&self) -> f64;
    fn duration(&self) -> f64;
    fn state(&self) -> &DocumentState;

    fn is_written(&self) -> bool {
        matches!(self.state(), DocumentState::Written(_))
    }

    fn has_entity(&self, id: u32) -> bool {
        self.entities().contains_key(&id)
    }

    fn entity(&self, id: u32) -> Option<&Entity> {
        self.entities().get(&id)
    }

    /// Fails with a `State` error once the document has been written.
    fn check_building(&self, operation: &'static str) -> LcgResult<()> {
        if self.is_written() {
            return Err(LcgError::State { operation });
        }
        Ok(())
    }

    /// Appends an entity to the document.
    ///
    /// # Errors
    /// - `State` if the document was already written.
    /// - `Validation` if an entity with the same id is already present. The document is left unchanged.
    ///
    /// # Example
    /// ```
    /// use lcg_backend::config::*;
    /// use lcg_backend::entity::Entity;
    /// use lcg_backend::error::ErrorKind;
    ///
    /// let mut doc = ConfigDocument::new(20000., 1.1).unwrap();
    /// doc.add_entity(Entity::recorder(0, [], true).unwrap()).unwrap();
    /// let err = doc.add_entity(Entity::recorder(0, [], false).unwrap()).unwrap_err();
    /// assert_eq!(err.kind(), ErrorKind::Validation);
    /// ```
    fn add_entity(&mut self, entity: Entity) -> LcgResult<()> {
        self.check_building("add an entity to")?;
        let id = entity.id();
        if self.has_entity(id) {
            return Err(ValidationError::DuplicateId { id }.into());
        }
        debug!(id, kind = entity.type_name(), "added entity");
        self.entities_().insert(id, entity);
        Ok(())
    }

    fn add_recorder(&mut self, id: u32, connections: &[u32], compress: bool) -> LcgResult<()> {
        self.add_entity(Entity::recorder(id, connections.iter().copied(), compress)?)
    }

    fn add_real_neuron(&mut self, id: u32, connections: &[u32], attrs: RealNeuronAttrs) -> LcgResult<()> {
        self.add_entity(Entity::real_neuron(id, connections.iter().copied(), attrs)?)
    }

    fn add_waveform(&mut self, id: u32, connections: &[u32], filename: &str, units: &str) -> LcgResult<()> {
        self.add_entity(Entity::waveform(id, connections.iter().copied(), filename, units)?)
    }

    fn add_conductance_stimulus(
        &mut self,
        id: u32,
        connections: &[u32],
        reversal_potential: f64,
    ) -> LcgResult<()> {
        self.add_entity(Entity::conductance_stimulus(
            id,
            connections.iter().copied(),
            reversal_potential,
        )?)
    }

    fn add_nmda_conductance_stimulus(
        &mut self,
        id: u32,
        connections: &[u32],
        reversal_potential: f64,
        block_k1: f64,
        block_k2: f64,
    ) -> LcgResult<()> {
        self.add_entity(Entity::nmda_conductance_stimulus(
            id,
            connections.iter().copied(),
            reversal_potential,
            block_k1,
            block_k2,
        )?)
    }

    fn add_ornstein_uhlenbeck(&mut self, id: u32, connections: &[u32], attrs: OuAttrs) -> LcgResult<()> {
        self.add_entity(Entity::ornstein_uhlenbeck(id, connections.iter().copied(), attrs)?)
    }

    /// Checks that every connection points to an entity of the document. Reports the first
    /// dangling reference in insertion order.
    fn validate_connections(&self) -> LcgResult<()> {
        for entity in self.entities().values() {
            if let Some(&target) = entity
                .connections()
                .iter()
                .find(|target| !self.has_entity(**target))
            {
                return Err(ValidationError::DanglingConnection {
                    entity: entity.id(),
                    target,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Checks that every entity is stored under its own id.
    fn validate_ids(&self) -> LcgResult<()> {
        match self.entities().iter().find(|(key, entity)| **key != entity.id()) {
            Some((&key, entity)) => {
                Err(ValidationError::MisplacedEntity { key, id: entity.id() }.into())
            }
            None => Ok(()),
        }
    }

    /// Serializes the document without writing it anywhere.
    fn to_xml(&self) -> LcgResult<String> {
        render_xml(self, Path::new("<memory>"))
    }

    /// Validates and writes the document to `path`, then marks it as written.
    ///
    /// # Errors
    /// - `State` if the document was already written.
    /// - `Validation` on the first connection to a missing entity, or on an entity stored under
    ///   another id.
    /// - `Io` if the file cannot be written.
    ///
    /// The document stays in the building state on any error.
    fn write(&mut self, path: &Path) -> LcgResult<()> {
        self.check_building("write")?;
        self.validate_ids()?;
        self.validate_connections()?;
        let xml = render_xml(self, path)?;
        fs::write(path, xml).map_err(|e| LcgError::io(path, e))?;
        info!(
            path = %path.display(),
            entities = self.entities().len(),
            sampling_rate = self.sampling_rate(),
            duration = self.duration(),
            "wrote configuration document"
        );
        *self.state_() = DocumentState::Written(path.to_path_buf());
        Ok(())
    }
}

fn xml_error(path: &Path, err: impl std::fmt::Display) -> LcgError {
    LcgError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
    )
}

struct XmlOut<'p> {
    writer: Writer<Cursor<Vec<u8>>>,
    path: &'p Path,
}

impl XmlOut<'_> {
    fn event(&mut self, event: Event<'_>) -> LcgResult<()> {
        self.writer
            .write_event(event)
            .map_err(|e| xml_error(self.path, e))
    }

    fn start(&mut self, tag: &str) -> LcgResult<()> {
        self.event(Event::Start(BytesStart::new(tag)))
    }

    fn end(&mut self, tag: &str) -> LcgResult<()> {
        self.event(Event::End(BytesEnd::new(tag)))
    }

    fn text_element(&mut self, tag: &str, text: &str) -> LcgResult<()> {
        self.start(tag)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(tag)
    }
}

fn render_xml<G: ConfigGraph + ?Sized>(graph: &G, path: &Path) -> LcgResult<String> {
    let mut out = XmlOut {
        writer: Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2),
        path,
    };

    out.event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    out.start("lcg")?;
    out.start("simulation")?;
    out.text_element("rate", &format_number(graph.sampling_rate()))?;
    out.text_element("tend", &format_number(graph.duration()))?;
    out.end("simulation")?;

    out.start("entities")?;
    for entity in graph.entities().values() {
        out.start("entity")?;
        out.text_element("name", entity.type_name())?;
        out.text_element("id", &entity.id().to_string())?;
        out.start("parameters")?;
        for (tag, value) in entity.kind().parameters() {
            out.text_element(tag, &value)?;
        }
        out.end("parameters")?;
        let connections = entity
            .connections()
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        out.text_element("connections", &connections)?;
        out.end("entity")?;
    }
    out.end("entities")?;
    out.end("lcg")?;

    let bytes = out.writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| xml_error(path, e))
}

/// Configuration document consumed by the external executable.
///
/// ```
/// use lcg_backend::config::*;
///
/// let dir = tempfile::tempdir().unwrap();
/// let mut doc = ConfigDocument::new(20000., 1.1).unwrap();
/// doc.add_recorder(0, &[], true).unwrap();
/// doc.add_waveform(1, &[0], "current.stim", "pA").unwrap();
/// doc.write(&dir.path().join("config.xml")).unwrap();
/// assert!(doc.is_written());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    sampling_rate: f64,
    duration: f64,
    entities: IndexMap<u32, Entity>,
    state: DocumentState,
}

impl sealed::DocumentStorage for ConfigDocument {
    fn entities_(&mut self) -> &mut IndexMap<u32, Entity> {
        &mut self.entities
    }
    fn state_(&mut self) -> &mut DocumentState {
        &mut self.state
    }
}

impl ConfigGraph for ConfigDocument {
    fn entities(&self) -> &IndexMap<u32, Entity> {
        &self.entities
    }
    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }
    fn duration(&self) -> f64 {
        self.duration
    }
    fn state(&self) -> &DocumentState {
        &self.state
    }
}

impl ConfigDocument {
    /// Creates an empty document. The sampling rate must be positive and the duration
    /// non-negative.
    pub fn new(sampling_rate: f64, duration: f64) -> LcgResult<Self> {
        if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
            return Err(ValidationError::MalformedAttribute {
                entity: "simulation",
                attribute: "rate",
                reason: format!("{} is not a positive rate", sampling_rate),
            }
            .into());
        }
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(ValidationError::MalformedAttribute {
                entity: "simulation",
                attribute: "tend",
                reason: format!("{} is not a non-negative duration", duration),
            }
            .into());
        }
        Ok(ConfigDocument {
            sampling_rate,
            duration,
            entities: IndexMap::new(),
            state: DocumentState::Building,
        })
    }

    /// Reads a written document back. The result is already in the written state.
    ///
    /// The simulation block may give either `rate` or its inverse `dt`.
    pub fn parse(path: impl AsRef<Path>) -> LcgResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| LcgError::io(path, e))?;
        let parsed = parse_xml(&contents, path)?;
        let mut doc = ConfigDocument::new(parsed.sampling_rate, parsed.duration)?;
        for entity in parsed.entities {
            doc.add_entity(entity)?;
        }
        doc.state = DocumentState::Written(path.to_path_buf());
        Ok(doc)
    }
}

struct ParsedDocument {
    sampling_rate: f64,
    duration: f64,
    entities: Vec<Entity>,
}

#[derive(Default)]
struct PendingEntity {
    name: Option<String>,
    id: Option<String>,
    parameters: IndexMap<String, String>,
    connections: String,
}

fn parse_xml(contents: &str, path: &Path) -> LcgResult<ParsedDocument> {
    let format_err = |reason: String| LcgError::format(path, None, reason);
    let number = |tag: &str, text: &str| -> LcgResult<f64> {
        text.trim()
            .parse::<f64>()
            .map_err(|_| format_err(format!("<{}> holds {:?}, not a number", tag, text)))
    };

    let mut reader = Reader::from_str(contents);
    reader.trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut rate = None;
    let mut tend = None;
    let mut pending: Option<PendingEntity> = None;
    let mut entities = Vec::new();

    loop {
        match reader.read_event().map_err(|e| format_err(e.to_string()))? {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if tag == "entity" && stack.len() == 2 {
                    pending = Some(PendingEntity::default());
                }
                stack.push(tag);
            }
            Event::End(_) => {
                if let Some(tag) = stack.pop() {
                    if tag == "entity" && stack.len() == 2 {
                        if let Some(entity) = pending.take() {
                            entities.push(finish_entity(entity, &format_err)?);
                        }
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| format_err(e.to_string()))?.into_owned();
                let path_tags: Vec<&str> = stack.iter().map(String::as_str).collect();
                match path_tags.as_slice() {
                    ["lcg", "simulation", "rate"] => rate = Some(number("rate", &text)?),
                    ["lcg", "simulation", "dt"] => rate = Some(1.0 / number("dt", &text)?),
                    ["lcg", "simulation", "tend"] => tend = Some(number("tend", &text)?),
                    ["lcg", "entities", "entity", field] => {
                        if let Some(entity) = pending.as_mut() {
                            match *field {
                                "name" => entity.name = Some(text),
                                "id" => entity.id = Some(text),
                                "connections" => entity.connections = text,
                                _ => {}
                            }
                        }
                    }
                    ["lcg", "entities", "entity", "parameters", param] => {
                        if let Some(entity) = pending.as_mut() {
                            entity.parameters.insert(param.to_string(), text);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(ParsedDocument {
        sampling_rate: rate.ok_or_else(|| format_err("missing simulation rate".to_string()))?,
        duration: tend.ok_or_else(|| format_err("missing simulation tend".to_string()))?,
        entities,
    })
}

fn finish_entity(pending: PendingEntity, format_err: &dyn Fn(String) -> LcgError) -> LcgResult<Entity> {
    let name = pending
        .name
        .ok_or_else(|| format_err("entity without <name>".to_string()))?;
    let id = pending
        .id
        .as_deref()
        .and_then(|id| id.trim().parse::<u32>().ok())
        .ok_or_else(|| format_err(format!("entity {} without a valid <id>", name)))?;
    let connections = pending
        .connections
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| {
            c.parse::<u32>()
                .map_err(|_| format_err(format!("entity {} has connection {:?}", id, c)))
        })
        .collect::<LcgResult<Vec<u32>>>()?;
    let kind = EntityKind::from_parameters(&name, &pending.parameters)?;
    Entity::new(id, connections, kind)
}
