use clinic_core::{
    subscription::BillingInterval, Currency, Money, Plan, TenantSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::auth::Role;

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
    pub tenants: Vec<TenantConfig>,
    pub billing: BillingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub api_keys: Vec<ApiKey>,
    pub basic_auth: Vec<BasicAuthUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub name: String,
    pub key: String,
    pub tenant_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthUser {
    pub username: String,
    pub password: String,
    pub tenant_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub documents_db: String,
    pub audit_db: String,
    /// HMAC key for PHI lookup indexes; startup fails while empty
    pub blind_index_key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub settings: TenantSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub code: String,
    pub name: String,
    /// Major units, e.g. "29.00"
    pub price: String,
    pub interval: BillingInterval,
    #[serde(default)]
    pub max_doctors: Option<u32>,
    #[serde(default)]
    pub max_patients: Option<u32>,
    #[serde(default)]
    pub trial_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingSettings {
    /// Currency of subscription prices
    pub currency: Currency,
    pub plans: Vec<PlanConfig>,
    /// Plan applied to tenants without a subscription record
    pub default_plan: String,
    pub payment_terms_days: u32,
    pub grace_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            storage: StorageSettings::default(),
            log: LogSettings::default(),
            tenants: vec![TenantConfig {
                id: "default".to_string(),
                name: "Default Clinic".to_string(),
                settings: TenantSettings::default(),
            }],
            billing: BillingSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            documents_db: "clinic.sqlite".to_string(),
            audit_db: "audit.sqlite".to_string(),
            blind_index_key: String::new(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            currency: Currency::usd(),
            plans: vec![
                PlanConfig {
                    code: "free".to_string(),
                    name: "Free".to_string(),
                    price: "0".to_string(),
                    interval: BillingInterval::Monthly,
                    max_doctors: Some(1),
                    max_patients: Some(100),
                    trial_days: 0,
                },
                PlanConfig {
                    code: "clinic".to_string(),
                    name: "Clinic".to_string(),
                    price: "49.00".to_string(),
                    interval: BillingInterval::Monthly,
                    max_doctors: Some(10),
                    max_patients: None,
                    trial_days: 14,
                },
            ],
            default_plan: "free".to_string(),
            payment_terms_days: 14,
            grace_days: 7,
        }
    }
}

impl BillingSettings {
    /// Plans with prices converted to minor units
    pub fn plans(&self) -> Result<Vec<Plan>, String> {
        self.plans
            .iter()
            .map(|p| {
                let price = Money::from_major_str(&p.price, self.currency.clone())
                    .map_err(|e| format!("plan {}: {}", p.code, e))?;
                if price.minor < 0 {
                    return Err(format!("plan {}: price cannot be negative", p.code));
                }
                Ok(Plan {
                    code: p.code.clone(),
                    name: p.name.clone(),
                    price: price.minor,
                    interval: p.interval,
                    max_doctors: p.max_doctors,
                    max_patients: p.max_patients,
                    trial_days: p.trial_days,
                })
            })
            .collect()
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        // Override with environment variables
        if let Ok(port) = std::env::var("CLINIC_PORT")
            && let Ok(port_num) = port.parse()
        {
            config.server.port = port_num;
        }

        if let Ok(host) = std::env::var("CLINIC_HOST") {
            config.server.host = host;
        }

        if let Ok(data_dir) = std::env::var("CLINIC_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(key) = std::env::var("CLINIC_BLIND_INDEX_KEY") {
            config.storage.blind_index_key = key;
        }

        if let Ok(level) = std::env::var("CLINIC_LOG_LEVEL") {
            config.log.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Cross-section consistency checks
    pub fn validate(&self) -> Result<(), String> {
        let mut tenant_ids = HashSet::new();
        for tenant in &self.tenants {
            if tenant.id.trim().is_empty() {
                return Err("tenant id cannot be empty".to_string());
            }
            if !tenant_ids.insert(tenant.id.as_str()) {
                return Err(format!("duplicate tenant id: {}", tenant.id));
            }
            tenant
                .settings
                .default_tax_rate
                .validate("default_tax_rate")
                .map_err(|e| format!("tenant {}: {}", tenant.id, e))?;
            if tenant.settings.slot_minutes == 0 {
                return Err(format!("tenant {}: slot_minutes must be positive", tenant.id));
            }
            if tenant.settings.opening_time >= tenant.settings.closing_time {
                return Err(format!(
                    "tenant {}: opening_time must be before closing_time",
                    tenant.id
                ));
            }
        }

        let credential_tenants = self
            .auth
            .api_keys
            .iter()
            .map(|k| (&k.name, &k.tenant_id))
            .chain(
                self.auth
                    .basic_auth
                    .iter()
                    .map(|u| (&u.username, &u.tenant_id)),
            );
        for (who, tenant_id) in credential_tenants {
            if !tenant_ids.contains(tenant_id.as_str()) {
                return Err(format!("credential {} refers to unknown tenant {}", who, tenant_id));
            }
        }

        let plans = self.billing.plans()?;
        if !plans.iter().any(|p| p.code == self.billing.default_plan) {
            return Err(format!(
                "default plan {} is not defined",
                self.billing.default_plan
            ));
        }
        Ok(())
    }

    pub fn tenant(&self, id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.id == id)
    }

    /// Get the full path to the documents database
    pub fn documents_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.documents_db)
    }

    /// Get the full path to the audit database
    pub fn audit_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.audit_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(!config.auth.enabled);
        assert!(config.tenant("default").is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_db_paths() {
        let config = ServerConfig::default();
        assert_eq!(
            config.documents_db_path(),
            PathBuf::from("data/clinic.sqlite")
        );
        assert_eq!(config.audit_db_path(), PathBuf::from("data/audit.sqlite"));
    }

    #[test]
    fn test_plan_prices_in_minor_units() {
        let plans = BillingSettings::default().plans().unwrap();
        let clinic = plans.iter().find(|p| p.code == "clinic").unwrap();
        assert_eq!(clinic.price, 4900);
        assert_eq!(clinic.trial_days, 14);
    }

    #[test]
    fn test_yaml_sections() {
        let yaml = r#"
server:
  port: 9000
storage:
  blind_index_key: north-lookup-key
auth:
  enabled: true
  api_keys:
    - name: front-desk
      key: secret-1
      tenant_id: north
      role: receptionist
tenants:
  - id: north
    name: North Clinic
    settings:
      currency: { code: JPY, exponent: 0 }
      default_tax_rate: 1000
      slot_minutes: 20
log:
  format: json
billing:
  default_plan: basic
  plans:
    - code: basic
      name: Basic
      price: "3000"
      interval: monthly
      max_doctors: 2
"#;
        let mut config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        config.billing.currency = Currency::new("JPY", 0).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.storage.blind_index_key, "north-lookup-key");
        assert_eq!(config.auth.api_keys[0].role, Role::Receptionist);

        let north = config.tenant("north").unwrap();
        assert_eq!(north.settings.slot_minutes, 20);
        assert_eq!(north.settings.default_tax_rate.basis_points(), 1000);
        assert_eq!(config.billing.plans().unwrap()[0].price, 3000);
    }

    #[test]
    fn test_validate_rejects_unknown_credential_tenant() {
        let mut config = ServerConfig::default();
        config.auth.api_keys.push(ApiKey {
            name: "stray".into(),
            key: "k".into(),
            tenant_id: "nowhere".into(),
            role: Role::Admin,
        });
        assert!(config.validate().unwrap_err().contains("unknown tenant"));
    }

    #[test]
    fn test_validate_rejects_missing_default_plan() {
        let mut config = ServerConfig::default();
        config.billing.default_plan = "enterprise".into();
        assert!(config.validate().is_err());
    }
}
