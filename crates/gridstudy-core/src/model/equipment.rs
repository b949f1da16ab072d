// ── Equipment types and records ──

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// The equipment categories a study spreadsheet can show.
///
/// The serialized form is the server's element-type tag
/// (`TWO_WINDINGS_TRANSFORMER`, `HVDC_LINE`, ...). Tags outside this set
/// are not cached and are ignored wherever they appear.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EquipmentType {
    Substation,
    VoltageLevel,
    Line,
    TwoWindingsTransformer,
    ThreeWindingsTransformer,
    Generator,
    Load,
    Battery,
    ShuntCompensator,
    StaticVarCompensator,
    DanglingLine,
    HvdcLine,
    LccConverterStation,
    VscConverterStation,
    TieLine,
    BusbarSection,
    Bus,
}

impl EquipmentType {
    /// Parse a server tag, returning `None` for types this cache ignores.
    pub fn from_tag(tag: &str) -> Option<Self> {
        tag.parse().ok()
    }

    /// Branch-like types carrying two sides of current limits.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Self::Line | Self::TwoWindingsTransformer | Self::TieLine
        )
    }
}

/// One piece of equipment as shown in a spreadsheet row.
///
/// Only `id` is interpreted by the cache; every other attribute is kept
/// in server order for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub id: String,

    #[serde(flatten)]
    pub attributes: IndexMap<String, Value>,
}

impl EquipmentRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: IndexMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
