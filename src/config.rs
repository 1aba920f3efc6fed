//! Configuração do console carregada a partir de `node-console.toml` e do ambiente.
//!
//! A struct [`ConsoleConfig`] contém os parâmetros ajustáveis (intervalos,
//! tentativas, módulos monitorados, processo do worker). Valores ausentes no
//! arquivo usam defaults sensíveis. Os segredos ficam em [`Credentials`] e
//! vêm sempre de variáveis de ambiente (opcionalmente de um arquivo `.env`).

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConsoleError;
use crate::state::{ModuleSpec, TransitionRule};

/// Nome do arquivo de configuração procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "node-console.toml";

/// Variável de ambiente que aponta para um arquivo de configuração alternativo.
pub const CONFIG_PATH_ENV: &str = "NODE_CONSOLE_CONFIG";

/// Chaves de ambiente obrigatórias, na ordem em que são reportadas.
pub const REQUIRED_ENV: [&str; 5] = [
    "API_KEY",
    "API_URL",
    "WALLET_ADDRESS",
    "PRIVATE_KEY",
    "SERVER_URL",
];

/// Configuração de nível superior carregada de `node-console.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// Nível de log padrão (sobrescrito por `NODE_CONSOLE_LOG`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Intervalo entre ciclos de polling, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout de cada requisição à API do nó, em milissegundos.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Intervalo do relógio que dispara as transições pendentes.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Atraso até um status transitório ser promovido.
    #[serde(default = "default_transition_delay_ms")]
    pub transition_delay_ms: u64,

    /// Máximo de tentativas do handshake de credenciais.
    #[serde(default = "default_registration_attempts")]
    pub registration_attempts: u32,

    /// Pausa entre tentativas do handshake, em milissegundos.
    #[serde(default = "default_registration_delay_ms")]
    pub registration_delay_ms: u64,

    /// Módulo que recebe o status de `/node/info`.
    #[serde(default = "default_status_module")]
    pub status_module: String,

    /// Símbolo exibido ao lado dos valores.
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default = "default_modules")]
    pub modules: Vec<ModuleConfig>,
}

/// Como o processo do worker é iniciado e encerrado.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Diretório de trabalho do worker (criado se não existir).
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Capacidade de disco oferecida pelo worker, em MB.
    #[serde(default = "default_disk_capacity_mb")]
    pub disk_capacity_mb: u64,

    /// Nomes de binários eliminados no encerramento. Vazio usa o nome do executável.
    #[serde(default)]
    pub process_names: Vec<String>,
}

/// Um módulo monitorado e sua regra de promoção automática.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    pub name: String,

    /// Chave em `earned` do endpoint de saldo. Padrão: nome em minúsculas.
    #[serde(default)]
    pub reward_source: Option<String>,

    #[serde(default)]
    pub initial_status: Option<String>,

    #[serde(default)]
    pub transient_status: Option<String>,

    #[serde(default)]
    pub target_status: Option<String>,

    #[serde(default)]
    pub auto_transition: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_transition_delay_ms() -> u64 {
    10_000
}

fn default_registration_attempts() -> u32 {
    15
}

fn default_registration_delay_ms() -> u64 {
    2000
}

fn default_status_module() -> String {
    "AI".to_string()
}

fn default_token_symbol() -> String {
    "AIOZ".to_string()
}

fn default_executable() -> PathBuf {
    PathBuf::from("./aioznode")
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("nodedata")
}

fn default_disk_capacity_mb() -> u64 {
    200_000
}

// Storage, Delivery, AI e Transcoding começam em "Initiating" e viram "Standby".
fn default_modules() -> Vec<ModuleConfig> {
    ["Storage", "Delivery", "AI", "Transcoding"]
        .into_iter()
        .map(|name| ModuleConfig {
            name: name.to_string(),
            reward_source: None,
            initial_status: Some("Initiating".to_string()),
            transient_status: Some("Initiating".to_string()),
            target_status: Some("Standby".to_string()),
            auto_transition: true,
        })
        .collect()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            working_dir: default_working_dir(),
            disk_capacity_mb: default_disk_capacity_mb(),
            process_names: Vec::new(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            transition_delay_ms: default_transition_delay_ms(),
            registration_attempts: default_registration_attempts(),
            registration_delay_ms: default_registration_delay_ms(),
            status_module: default_status_module(),
            token_symbol: default_token_symbol(),
            worker: WorkerConfig::default(),
            modules: default_modules(),
        }
    }
}

impl ConsoleConfig {
    /// Carrega a configuração de `path`, de `NODE_CONSOLE_CONFIG` ou de
    /// `node-console.toml`, nessa ordem.
    ///
    /// Um caminho explícito que não existe é erro; o arquivo padrão ausente
    /// resulta nos valores padrão.
    pub fn load(path: Option<&Path>) -> Result<Self, ConsoleError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConsoleError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                Self::from_file(&path)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConsoleError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<ConsoleConfig>(&contents)?)
    }

    /// Rejeita valores com os quais o console não consegue operar.
    pub fn validate(&self) -> Result<(), ConsoleError> {
        let intervals = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConsoleError::Config(format!("{key} must be greater than zero")));
        }
        if self.registration_attempts == 0 {
            return Err(ConsoleError::Config(
                "registration_attempts must be at least 1".into(),
            ));
        }
        if self.modules.is_empty() {
            return Err(ConsoleError::Config("at least one module is required".into()));
        }
        for module in &self.modules {
            if module.auto_transition
                && (module.transient_status.is_none() || module.target_status.is_none())
            {
                return Err(ConsoleError::Config(format!(
                    "module {} enables auto_transition without transient_status and target_status",
                    module.name
                )));
            }
        }

        // Cada módulo precisa de nome e fonte de recompensa exclusivos.
        let mut names = HashSet::new();
        let mut sources = HashSet::new();
        for spec in self.module_specs() {
            if !names.insert(spec.name.clone()) {
                return Err(ConsoleError::Config(format!(
                    "module {} is configured more than once",
                    spec.name
                )));
            }
            if !sources.insert(spec.reward_source.clone()) {
                return Err(ConsoleError::Config(format!(
                    "reward_source {} is used by more than one module",
                    spec.reward_source
                )));
            }
        }
        if !names.contains(&self.status_module) {
            return Err(ConsoleError::Config(format!(
                "status_module {} is not one of the configured modules",
                self.status_module
            )));
        }
        Ok(())
    }

    /// Two back-to-back requests can take longer than one poll period.
    pub fn poll_may_overrun(&self) -> bool {
        self.poll_interval_ms <= self.request_timeout_ms * 2
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn registration_delay(&self) -> Duration {
        Duration::from_millis(self.registration_delay_ms)
    }

    /// Converte os módulos configurados no formato do reconciliador.
    pub fn module_specs(&self) -> Vec<ModuleSpec> {
        let delay = Duration::from_millis(self.transition_delay_ms);
        self.modules
            .iter()
            .map(|m| {
                let rule = match (&m.transient_status, &m.target_status) {
                    (Some(transient), Some(target)) if m.auto_transition => Some(TransitionRule {
                        transient: transient.clone(),
                        target: target.clone(),
                        delay,
                    }),
                    _ => None,
                };
                ModuleSpec {
                    name: m.name.clone(),
                    reward_source: m
                        .reward_source
                        .clone()
                        .unwrap_or_else(|| m.name.to_lowercase()),
                    initial_status: m.initial_status.clone(),
                    rule,
                }
            })
            .collect()
    }
}

impl WorkerConfig {
    /// Nomes de processo alvo da varredura de encerramento.
    pub fn kill_names(&self) -> Vec<String> {
        if !self.process_names.is_empty() {
            return self.process_names.clone();
        }
        self.executable
            .file_name()
            .map(|n| vec![n.to_string_lossy().into_owned()])
            .unwrap_or_default()
    }
}

/// Segredos e endpoints lidos do ambiente.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_url: String,
    pub wallet_address: String,
    pub private_key: String,
    pub server_url: String,
}

impl Credentials {
    /// Lê as credenciais das variáveis de ambiente do processo.
    pub fn from_env() -> Result<Self, ConsoleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Lê as credenciais por meio de `lookup`; todas as chaves ausentes ou
    /// vazias são reportadas de uma vez.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConsoleError> {
        let mut missing = Vec::new();
        let mut values = REQUIRED_ENV.map(|key| {
            let value = lookup(key).filter(|v| !v.trim().is_empty());
            if value.is_none() {
                missing.push(key);
            }
            value.unwrap_or_default()
        });
        if !missing.is_empty() {
            return Err(ConsoleError::MissingEnv(missing));
        }

        let mut take = |i: usize| std::mem::take(&mut values[i]);
        Ok(Self {
            api_key: take(0),
            api_url: take(1),
            wallet_address: take(2),
            private_key: take(3),
            server_url: take(4),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("wallet_address", &self.wallet_address)
            .field("private_key", &"<redacted>")
            .field("server_url", &self.server_url)
            .finish()
    }
}
