//! # Skill Directory
//!
//! The purchasable item. Skill records are owned by the catalog subsystem;
//! checkout only reads them through [`SkillDirectory`].
//! A static catalog can be loaded from `config/skills.toml` for development.

use crate::error::PaymentResult;
use crate::money::Price;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pricing model of a skill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    Free,
    Paid,
}

impl Default for PriceType {
    fn default() -> Self {
        PriceType::Paid
    }
}

/// A skill as seen by checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: Uuid,
    pub name: String,
    pub price: Price,
    #[serde(default)]
    pub price_type: PriceType,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Skill {
    pub fn paid(id: Uuid, name: impl Into<String>, price: Price) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            price_type: PriceType::Paid,
            is_active: true,
        }
    }

    pub fn is_free(&self) -> bool {
        self.price_type == PriceType::Free || self.price.amount <= 0
    }
}

/// Read access to skills
#[async_trait]
pub trait SkillDirectory: Send + Sync {
    async fn find_skill(&self, skill_id: Uuid) -> PaymentResult<Option<Skill>>;
}

/// In-process skill catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillCatalog {
    #[serde(default)]
    pub skills: Vec<Skill>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self { skills: Vec::new() }
    }

    pub fn add(&mut self, skill: Skill) {
        self.skills.push(skill);
    }

    pub fn with_skill(mut self, skill: Skill) -> Self {
        self.add(skill);
        self
    }

    pub fn get(&self, id: Uuid) -> Option<&Skill> {
        self.skills.iter().find(|s| s.id == id)
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

#[async_trait]
impl SkillDirectory for SkillCatalog {
    async fn find_skill(&self, skill_id: Uuid) -> PaymentResult<Option<Skill>> {
        Ok(self.get(skill_id).cloned())
    }
}
