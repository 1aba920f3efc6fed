//! Interface de linha de comando do console baseada em clap.
//!
//! As flags sobrescrevem os valores do arquivo de configuração; segredos e
//! endpoints continuam vindo exclusivamente do ambiente.

use std::path::PathBuf;

use clap::Parser;

use crate::config::ConsoleConfig;

/// Console de operador para um nó de computação distribuída.
#[derive(Debug, Parser)]
#[command(name = "node-console", version, about)]
pub struct Cli {
    /// Caminho do arquivo de configuração TOML.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Executável do worker a ser supervisionado.
    #[arg(long)]
    pub executable: Option<PathBuf>,

    /// Diretório de dados do worker.
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Capacidade de disco anunciada pelo worker, em MB.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub disk_capacity: Option<u64>,

    /// Desativa o painel; apenas logs são emitidos.
    #[arg(long, default_value_t = false)]
    pub no_dashboard: bool,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Aplica as flags informadas sobre a configuração carregada.
    pub fn apply(&self, config: &mut ConsoleConfig) {
        if let Some(executable) = &self.executable {
            config.worker.executable = executable.clone();
        }
        if let Some(dir) = &self.working_dir {
            config.worker.working_dir = dir.clone();
        }
        if let Some(mb) = self.disk_capacity {
            config.worker.disk_capacity_mb = mb;
        }
    }
}
