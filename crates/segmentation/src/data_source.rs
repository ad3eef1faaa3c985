//! Data sources describe where, structurally, a value is read from at
//! evaluation time: the installation document, an event, a nested field,
//! or a derived quantity such as a presence timestamp.

use pushpulse_core::FieldPath;

/// A chain of sources rooted at a top-level document. Each node owns a
/// boxed copy of its parent; the chain is always acyclic.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Installation,
    User,
    Event,
    Field {
        parent: Box<DataSource>,
        path: FieldPath,
    },
    LastActivityDate {
        parent: Box<DataSource>,
    },
    PresenceSinceDate {
        parent: Box<DataSource>,
        present: bool,
    },
    PresenceElapsedTime {
        parent: Box<DataSource>,
        present: bool,
    },
    GeoLocation {
        parent: Box<DataSource>,
    },
    GeoDate {
        parent: Box<DataSource>,
    },
}

impl DataSource {
    pub fn field(parent: DataSource, path: FieldPath) -> Self {
        DataSource::Field {
            parent: Box::new(parent),
            path,
        }
    }

    pub fn last_activity_date(parent: DataSource) -> Self {
        DataSource::LastActivityDate {
            parent: Box::new(parent),
        }
    }

    /// Presence sources only make sense for installation data.
    pub fn presence_since_date(parent: DataSource, present: bool) -> Self {
        debug_assert!(matches!(parent.root(), DataSource::Installation));
        DataSource::PresenceSinceDate {
            parent: Box::new(parent),
            present,
        }
    }

    pub fn presence_elapsed_time(parent: DataSource, present: bool) -> Self {
        debug_assert!(matches!(parent.root(), DataSource::Installation));
        DataSource::PresenceElapsedTime {
            parent: Box::new(parent),
            present,
        }
    }

    pub fn geo_location(parent: DataSource) -> Self {
        DataSource::GeoLocation {
            parent: Box::new(parent),
        }
    }

    pub fn geo_date(parent: DataSource) -> Self {
        DataSource::GeoDate {
            parent: Box::new(parent),
        }
    }

    pub fn parent(&self) -> Option<&DataSource> {
        match self {
            DataSource::Installation | DataSource::User | DataSource::Event => None,
            DataSource::Field { parent, .. }
            | DataSource::LastActivityDate { parent }
            | DataSource::PresenceSinceDate { parent, .. }
            | DataSource::PresenceElapsedTime { parent, .. }
            | DataSource::GeoLocation { parent }
            | DataSource::GeoDate { parent } => Some(parent),
        }
    }

    /// The top-level source this chain is rooted at.
    pub fn root(&self) -> &DataSource {
        let mut source = self;
        while let Some(parent) = source.parent() {
            source = parent;
        }
        source
    }

    /// Stable discriminator used for logging and serialization, never for
    /// parsing dispatch.
    pub fn name(&self) -> &'static str {
        match self {
            DataSource::Installation => "installation",
            DataSource::User => "user",
            DataSource::Event => "event",
            DataSource::Field { .. } => "field",
            DataSource::LastActivityDate { .. } => "lastActivityDate",
            DataSource::PresenceSinceDate { .. } => "presenceSinceDate",
            DataSource::PresenceElapsedTime { .. } => "presenceElapsedTime",
            DataSource::GeoLocation { .. } => "geoLocation",
            DataSource::GeoDate { .. } => "geoDate",
        }
    }

    /// Concatenation of every ancestor field path plus this node's own.
    pub fn full_path(&self) -> FieldPath {
        let mut parts = match self.parent() {
            Some(parent) => parent.full_path().parts,
            None => Vec::new(),
        };
        if let DataSource::Field { path, .. } = self {
            parts.extend(path.parts.iter().cloned());
        }
        FieldPath::new(parts)
    }
}
