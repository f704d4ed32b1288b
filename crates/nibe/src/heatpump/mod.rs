// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pump model registry and the per-model coil tables.
//!
//! Register definitions are JSON artifacts shipped with the crate,
//! one file per model family (several models share a file). The
//! [`HeatPump`] loads its model's table once at construction and
//! indexes it by address and by symbolic name.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::coil::{Coil, CoilData, CoilKind, CoilSize};
use crate::errors::{CoilNotFound, HeatPumpError};
use crate::event::{Event, EventBus, COIL_UPDATE_EVENT};

/// Firmware family of a pump model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Series {
    F,
    S,
    Custom,
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F => f.write_str("F"),
            Self::S => f.write_str("S"),
            Self::Custom => f.write_str("custom"),
        }
    }
}

macro_rules! models {
    ($(($variant:ident, $name:literal, $series:ident, $file:literal)),+ $(,)?) => {
        /// Known pump models. Several models share one definition file.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Model {
            $($variant,)+
            /// Definitions read from `custom.json` in the working
            /// directory at construction time.
            Custom,
        }

        impl Model {
            /// Every model with embedded definitions.
            #[must_use]
            pub fn all() -> &'static [Model] {
                &[$(Model::$variant),+]
            }

            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                    Self::Custom => "CUSTOM",
                }
            }

            #[must_use]
            pub fn series(self) -> Series {
                match self {
                    $(Self::$variant => Series::$series,)+
                    Self::Custom => Series::Custom,
                }
            }

            /// Key of the register definition artifact for this model.
            #[must_use]
            pub fn data_file(self) -> &'static str {
                match self {
                    $(Self::$variant => $file,)+
                    Self::Custom => "custom",
                }
            }

            fn coil_data(self) -> Result<Cow<'static, str>, HeatPumpError> {
                match self {
                    $(Self::$variant => Ok(Cow::Borrowed(
                        include_str!(concat!("../../data/", $file, ".json")),
                    )),)+
                    Self::Custom => Ok(Cow::Owned(std::fs::read_to_string("custom.json")?)),
                }
            }
        }
    };
}

models! {
    (F1145, "F1145", F, "f1145_f1245"),
    (F1245, "F1245", F, "f1145_f1245"),
    (F1155, "F1155", F, "f1155_f1255"),
    (F1255, "F1255", F, "f1155_f1255"),
    (F1345, "F1345", F, "f1345"),
    (F1355, "F1355", F, "f1355"),
    (F370, "F370", F, "f370_f470"),
    (F470, "F470", F, "f370_f470"),
    (F730, "F730", F, "f730"),
    (F750, "F750", F, "f750"),
    (SMO20, "SMO20", F, "smo20"),
    (SMO40, "SMO40", F, "smo40"),
    (VVM225, "VVM225", F, "vvm225_vvm320_vvm325"),
    (VVM310, "VVM310", F, "vvm310_vvm500"),
    (VVM320, "VVM320", F, "vvm225_vvm320_vvm325"),
    (VVM325, "VVM325", F, "vvm225_vvm320_vvm325"),
    (VVM500, "VVM500", F, "vvm310_vvm500"),
    (S320, "S320", S, "s320_s325"),
    (S325, "S325", S, "s320_s325"),
    (S1155, "S1155", S, "s1155_s1255"),
    (S1255, "S1255", S, "s1155_s1255"),
    (S2125, "S2125", S, "s2125"),
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Find the model whose name occurs in a product string,
/// case-insensitively. First match wins.
pub fn identify_model(product: &str) -> Result<Model, HeatPumpError> {
    let haystack = product.to_uppercase();
    Model::all()
        .iter()
        .copied()
        .find(|model| haystack.contains(model.name()))
        .ok_or_else(|| HeatPumpError::ModelIdentificationFailed {
            product: product.to_string(),
        })
}

/// Identity a pump reports in `PRODUCT_INFO_MSG` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub model: String,
    pub firmware_version: u16,
}

impl ProductInfo {
    #[must_use]
    pub fn new(model: impl Into<String>, firmware_version: u16) -> Self {
        Self {
            model: model.into(),
            firmware_version,
        }
    }

    /// Match the product string against the known model names.
    pub fn identify_model(&self) -> Result<Model, HeatPumpError> {
        identify_model(&self.model)
    }
}

impl fmt::Display for ProductInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (firmware {})", self.model, self.firmware_version)
    }
}

/// One entry of a register definition file.
#[derive(Debug, Deserialize)]
struct CoilDefinition {
    name: String,
    title: String,
    size: CoilSize,
    #[serde(default = "default_factor")]
    factor: i32,
    min: Option<i64>,
    max: Option<i64>,
    unit: Option<String>,
    info: Option<String>,
    #[serde(default)]
    write: bool,
    mappings: Option<BTreeMap<String, String>>,
    #[serde(rename = "type", default)]
    kind: CoilKind,
}

fn default_factor() -> i32 {
    1
}

impl CoilDefinition {
    fn build(self, address: u16) -> Result<Coil, String> {
        let mut builder = Coil::builder(address, self.name, self.title, self.size)
            .factor(self.factor)
            .write(self.write)
            .kind(self.kind)
            .bounds(self.min, self.max);
        if let Some(unit) = self.unit {
            builder = builder.unit(unit);
        }
        if let Some(info) = self.info {
            builder = builder.info(info);
        }
        if let Some(mappings) = self.mappings {
            let mut entries = Vec::with_capacity(mappings.len());
            for (key, label) in mappings {
                let raw: i64 = key
                    .parse()
                    .map_err(|_| format!("mapping key {key:?} is not an integer"))?;
                entries.push((raw, label));
            }
            builder = builder.mappings(entries);
        }
        builder.build().map_err(|err| err.to_string())
    }
}

/// The model registry for one pump: owns the coil descriptors, the
/// event bus and the connection-wide word-swap setting.
pub struct HeatPump {
    model: Model,
    coils: BTreeMap<u16, Coil>,
    names: HashMap<String, u16>,
    events: EventBus,
    word_swap: RwLock<Option<bool>>,
}

impl HeatPump {
    /// Load the model's register definitions and build the registry.
    ///
    /// Definitions with invalid combinations are skipped with a
    /// warning; only an unreadable or unparsable file is fatal.
    pub fn new(model: Model) -> Result<Self, HeatPumpError> {
        let raw = model.coil_data()?;
        let file = format!("{}.json", model.data_file());
        let definitions: BTreeMap<String, CoilDefinition> =
            serde_json::from_str(&raw).map_err(|err| HeatPumpError::RegisterDefinition {
                file: file.clone(),
                reason: err.to_string(),
            })?;

        let mut coils = BTreeMap::new();
        let mut names = HashMap::new();
        for (key, definition) in definitions {
            let address: u16 = match key.parse() {
                Ok(address) => address,
                Err(_) => {
                    log::warn!("{file}: skipping coil with non-numeric address {key:?}");
                    continue;
                }
            };
            match definition.build(address) {
                Ok(coil) => {
                    names.insert(coil.name.clone(), address);
                    coils.insert(address, coil);
                }
                Err(reason) => {
                    log::warn!("{file}: skipping coil {address}: {reason}");
                }
            }
        }
        log::info!("loaded {} coils for model {model}", coils.len());

        Ok(Self {
            model,
            coils,
            names,
            events: EventBus::new(),
            word_swap: RwLock::new(None),
        })
    }

    /// Identify the model from product info and load its registry.
    pub fn from_product_info(info: &ProductInfo) -> Result<Self, HeatPumpError> {
        Self::new(info.identify_model()?)
    }

    #[must_use]
    pub fn model(&self) -> Model {
        self.model
    }

    #[must_use]
    pub fn series(&self) -> Series {
        self.model.series()
    }

    pub fn get_coil_by_address(&self, address: u16) -> Result<&Coil, CoilNotFound> {
        self.coils
            .get(&address)
            .ok_or(CoilNotFound::Address(address))
    }

    pub fn get_coil_by_name(&self, name: &str) -> Result<&Coil, CoilNotFound> {
        self.names
            .get(name)
            .and_then(|address| self.coils.get(address))
            .ok_or_else(|| CoilNotFound::Name(name.to_string()))
    }

    /// All coils in ascending address order.
    pub fn coils(&self) -> impl Iterator<Item = &Coil> {
        self.coils.values()
    }

    #[must_use]
    pub fn coil_count(&self) -> usize {
        self.coils.len()
    }

    /// Word order for 32-bit values, once known.
    #[must_use]
    pub fn word_swap(&self) -> Option<bool> {
        *self.word_swap.read()
    }

    pub fn set_word_swap(&self, word_swap: bool) {
        *self.word_swap.write() = Some(word_swap);
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Append a listener for one of the named events.
    pub fn subscribe<F>(&self, event_name: &str, listener: F)
    where
        F: for<'a> Fn(&Event<'a>) + Send + Sync + 'static,
    {
        self.events.subscribe(event_name, listener);
    }

    /// Dispatch a decoded register update to `coil_update` listeners.
    pub fn notify_coil_update(&self, data: &CoilData<'_>) {
        self.events.notify(COIL_UPDATE_EVENT, &Event::CoilUpdate(data));
    }
}

impl fmt::Debug for HeatPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeatPump")
            .field("model", &self.model)
            .field("coils", &self.coils.len())
            .field("word_swap", &self.word_swap())
            .finish()
    }
}
