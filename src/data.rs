use std::{
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::ringing::{RingRates, RingRegistry};
use crate::roles::{ButtonRole, RoleGroup};
use crate::sessions::SessionService;
use dashmap::DashMap;
use poise::ChoiceParameter;
use poise::serenity_prelude as serenity;
use serde::{Deserialize, Serialize};
use serenity::prelude::TypeMapKey;
use tracing::warn;

const GUILD_CONFIG_FILE: &str = "guild_config.yaml";
const MEMBER_PREFS_FILE: &str = "member_prefs.yaml";
const BUTTON_ROLES_FILE: &str = "button_roles.yaml";
const RING_RATES_FILE: &str = "ring_rates.yaml";

/// Guild configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildConfig {
    // The ID of the guild
    pub guild_id: u64,
    // Whether voice sessions are tracked in this guild
    pub collect_voice_data: bool,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            collect_voice_data: true,
        }
    }
}

/// Per-member preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberPrefs {
    pub user_id: u64,
    // Whether other members may ring this member
    pub ringable: bool,
}

impl Default for MemberPrefs {
    fn default() -> Self {
        Self {
            user_id: 0,
            ringable: true,
        }
    }
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild_configs", &self.guild_configs)
            .field("member_prefs", &self.member_prefs)
            .field("sessions", &self.sessions)
            .field("button_roles", &self.button_roles)
            .field("rings", &self.rings)
            .field("ring_rates", &self.ring_rates)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    /// Create a new Data instance with in-memory session storage
    #[must_use]
    pub fn new() -> Self {
        Self::with_sessions(SessionService::in_memory(), PathBuf::from("data"))
    }

    /// Create a new Data instance around an existing session service
    #[must_use]
    pub fn with_sessions(sessions: SessionService, data_dir: impl Into<PathBuf>) -> Self {
        Self(Arc::new(DataInner::new(sessions, data_dir.into())))
    }

    /// Load guild configs, member preferences, self-assignable roles and the
    /// ring rate table from YAML files in `data_dir`
    pub async fn load(sessions: SessionService, data_dir: impl Into<PathBuf>) -> Self {
        let mut inner = DataInner::new(sessions, data_dir.into());
        if let Some(rates) = read_yaml::<RingRates>(&inner.data_dir.join(RING_RATES_FILE)).await {
            inner.ring_rates = rates;
        }
        inner.load().await;
        Self(Arc::new(inner))
    }

    /// Save guild configs and member preferences to YAML files
    /// # Errors
    /// This function will return an error if:
    /// - The data directory cannot be created
    /// - The data cannot be serialized to YAML
    /// - The YAML cannot be written to disk
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.save().await
    }

    /// Get the guild configuration for a specific guild, or the defaults
    #[must_use]
    pub fn get_guild_config(&self, guild_id: serenity::GuildId) -> GuildConfig {
        self.guild_configs.get(&guild_id).map_or_else(
            || GuildConfig {
                guild_id: guild_id.get(),
                ..Default::default()
            },
            |entry| entry.value().clone(),
        )
    }

    /// Whether voice sessions are tracked in `guild_id`
    #[must_use]
    pub fn collects_voice_data(&self, guild_id: serenity::GuildId) -> bool {
        self.get_guild_config(guild_id).collect_voice_data
    }

    /// Turn voice session tracking on or off for `guild_id`
    pub fn set_collect_voice_data(&self, guild_id: serenity::GuildId, enabled: bool) {
        self.guild_configs
            .entry(guild_id)
            .or_insert_with(|| GuildConfig {
                guild_id: guild_id.get(),
                ..Default::default()
            })
            .collect_voice_data = enabled;
    }

    /// Get a member's preferences, or the defaults
    #[must_use]
    pub fn get_member_prefs(&self, user_id: serenity::UserId) -> MemberPrefs {
        self.member_prefs.get(&user_id).map_or_else(
            || MemberPrefs {
                user_id: user_id.get(),
                ..Default::default()
            },
            |entry| entry.value().clone(),
        )
    }

    /// Whether other members may ring `user_id`
    #[must_use]
    pub fn is_ringable(&self, user_id: serenity::UserId) -> bool {
        self.get_member_prefs(user_id).ringable
    }

    /// Allow or forbid ringing `user_id`
    pub fn set_ringable(&self, user_id: serenity::UserId, ringable: bool) {
        self.member_prefs
            .entry(user_id)
            .or_insert_with(|| MemberPrefs {
                user_id: user_id.get(),
                ..Default::default()
            })
            .ringable = ringable;
    }

    /// Register `role` as self-assignable, returning the record it replaced
    pub fn add_button_role(&self, role: ButtonRole) -> Option<ButtonRole> {
        self.button_roles.insert(role.role_id, role)
    }

    /// Take `role_id` out of `guild_id`'s self-assignable roles
    pub fn remove_button_role(
        &self,
        guild_id: serenity::GuildId,
        role_id: serenity::RoleId,
    ) -> Option<ButtonRole> {
        self.button_roles
            .remove_if(&role_id.get(), |_, role| role.guild_id == guild_id.get())
            .map(|(_, role)| role)
    }

    /// Self-assignable role record for `role_id` in `guild_id`
    #[must_use]
    pub fn button_role(
        &self,
        guild_id: serenity::GuildId,
        role_id: serenity::RoleId,
    ) -> Option<ButtonRole> {
        self.button_roles
            .get(&role_id.get())
            .filter(|role| role.guild_id == guild_id.get())
            .map(|role| role.value().clone())
    }

    /// Self-assignable roles of `guild_id`, optionally of one group, ordered
    /// by group then label
    #[must_use]
    pub fn button_roles_in(
        &self,
        guild_id: serenity::GuildId,
        group: Option<RoleGroup>,
    ) -> Vec<ButtonRole> {
        let mut roles: Vec<ButtonRole> = self
            .button_roles
            .iter()
            .filter(|role| role.guild_id == guild_id.get())
            .filter(|role| group.is_none_or(|group| role.group == group))
            .map(|role| role.value().clone())
            .collect();
        roles.sort_by(|a, b| {
            a.group
                .name()
                .cmp(b.group.name())
                .then_with(|| a.label.cmp(&b.label))
        });
        roles
    }

    /// Re-read the self-assignable roles from disk, returning how many there are
    pub async fn reload_button_roles(&self) -> usize {
        let roles = read_yaml::<Vec<ButtonRole>>(&self.data_dir.join(BUTTON_ROLES_FILE))
            .await
            .unwrap_or_default();
        self.button_roles.clear();
        self.0.insert_button_roles(roles);
        self.button_roles.len()
    }
}

/// Main centralized data structure for the bot
pub struct DataInner {
    // Map of guild_id -> guild configuration
    pub guild_configs: DashMap<serenity::GuildId, GuildConfig>,
    // Map of user_id -> member preferences
    pub member_prefs: DashMap<serenity::UserId, MemberPrefs>,
    // Voice session tracking
    pub sessions: SessionService,
    // Map of role_id -> self-assignable role
    pub button_roles: DashMap<u64, ButtonRole>,
    // Rings in progress
    pub rings: RingRegistry,
    // Ring rate per presence
    pub ring_rates: RingRates,
    // Directory holding the YAML files
    pub data_dir: PathBuf,
}

impl DataInner {
    #[must_use]
    pub fn new(sessions: SessionService, data_dir: PathBuf) -> Self {
        Self {
            guild_configs: DashMap::new(),
            member_prefs: DashMap::new(),
            button_roles: DashMap::new(),
            sessions,
            rings: RingRegistry::new(),
            ring_rates: RingRates::default(),
            data_dir,
        }
    }

    /// Load data from YAML files
    ///
    /// Missing files leave the maps empty. Files that fail to parse are
    /// logged and skipped.
    async fn load(&self) {
        if let Some(configs) = read_yaml::<Vec<GuildConfig>>(&self.data_dir.join(GUILD_CONFIG_FILE)).await
        {
            // Ids of zero are not valid snowflakes
            for config in configs.into_iter().filter(|config| config.guild_id != 0) {
                let guild_id = serenity::GuildId::new(config.guild_id);
                self.guild_configs.insert(guild_id, config);
            }
        }

        if let Some(prefs) =
            read_yaml::<Vec<MemberPrefs>>(&self.data_dir.join(MEMBER_PREFS_FILE)).await
        {
            for pref in prefs.into_iter().filter(|pref| pref.user_id != 0) {
                let user_id = serenity::UserId::new(pref.user_id);
                self.member_prefs.insert(user_id, pref);
            }
        }

        if let Some(roles) =
            read_yaml::<Vec<ButtonRole>>(&self.data_dir.join(BUTTON_ROLES_FILE)).await
        {
            self.insert_button_roles(roles);
        }
    }

    fn insert_button_roles(&self, roles: Vec<ButtonRole>) {
        for role in roles.into_iter().filter(|role| role.role_id != 0) {
            self.button_roles.insert(role.role_id, role);
        }
    }

    /// Save data to YAML files
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The data directory cannot be created
    /// - The data cannot be serialized to YAML
    /// - The YAML cannot be written to disk
    async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let mut configs: Vec<GuildConfig> = self
            .guild_configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by_key(|config| config.guild_id);
        let yaml = serde_yaml::to_string(&configs)?;
        tokio::fs::write(self.data_dir.join(GUILD_CONFIG_FILE), yaml).await?;

        let mut prefs: Vec<MemberPrefs> = self
            .member_prefs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        prefs.sort_by_key(|pref| pref.user_id);
        let prefs_yaml = serde_yaml::to_string(&prefs)?;
        tokio::fs::write(self.data_dir.join(MEMBER_PREFS_FILE), prefs_yaml).await?;

        let mut roles: Vec<ButtonRole> = self
            .button_roles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        roles.sort_by_key(|role| (role.guild_id, role.role_id));
        let roles_yaml = serde_yaml::to_string(&roles)?;
        tokio::fs::write(self.data_dir.join(BUTTON_ROLES_FILE), roles_yaml).await?;

        Ok(())
    }
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    match serde_yaml::from_str::<T>(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unreadable {}: {e}", path.display());
            None
        }
    }
}
