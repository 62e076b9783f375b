//! Modelo de Driver
//! 
//! Los viajes referencian al driver por nombre o por su código ITPL.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    /// Identificador estilo "ITPL-0042"
    pub code: Option<String>,
    pub mobile: Option<String>,
}

impl Driver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            code: None,
            mobile: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_mobile(mut self, mobile: impl Into<String>) -> Self {
        self.mobile = Some(mobile.into());
        self
    }

    /// Coincidencia por nombre o código, sin distinguir mayúsculas
    pub fn matches(&self, name_or_code: &str) -> bool {
        let needle = name_or_code.trim();
        self.name.trim().eq_ignore_ascii_case(needle)
            || self
                .code
                .as_deref()
                .map_or(false, |code| code.trim().eq_ignore_ascii_case(needle))
    }
}
