//! Interface de terminal do console: painel de módulos e spinner de registro.
//!
//! Usa as crates `indicatif` para o spinner do handshake de credenciais e
//! `console` para estilização com cores. O [`Dashboard`] apenas lê um
//! [`Snapshot`]; nunca altera o estado.

use std::io;
use std::path::Path;

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};

use crate::state::{RegistrationStatus, Snapshot};

/// Indicador visual do handshake de registro de credenciais.
pub struct RegistrationProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl RegistrationProgress {
    /// Inicia o spinner. Oculto quando `visible` é falso.
    pub fn start(visible: bool) -> Self {
        let pb = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Registering wallet with node...");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Atualiza a mensagem com o número da tentativa.
    pub fn attempt(&self, attempt: u32, max: u32) {
        self.pb
            .set_message(format!("Registering wallet with node ({attempt}/{max})..."));
    }

    /// Finaliza o spinner e exibe o resultado do registro.
    pub fn finish(&self, status: RegistrationStatus) {
        self.pb.finish_and_clear();
        if self.pb.is_hidden() {
            return;
        }
        match status {
            RegistrationStatus::Registered => {
                println!("  {} Wallet registered", self.green.apply_to("✓"));
            }
            _ => {
                println!(
                    "  {} Registration failed, awaiting registration",
                    self.red.apply_to("✗")
                );
            }
        }
    }
}

/// Espaço ocupado pelo diretório de dados do worker frente à capacidade anunciada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub used_bytes: u64,
    pub capacity_mb: u64,
}

impl DiskUsage {
    /// Soma o tamanho dos arquivos sob `dir`, sem seguir links simbólicos.
    /// Um diretório ainda inexistente conta como vazio.
    pub fn measure(dir: &Path, capacity_mb: u64) -> io::Result<Self> {
        let used_bytes = match dir_size(dir) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            other => other?,
        };
        Ok(Self {
            used_bytes,
            capacity_mb,
        })
    }

    /// Percentual ocupado, limitado a 100.
    pub fn percent(&self) -> u64 {
        if self.capacity_mb == 0 {
            return 0;
        }
        let capacity_bytes = self.capacity_mb.saturating_mul(1_000_000);
        (self.used_bytes.saturating_mul(100) / capacity_bytes).min(100)
    }

    fn label(&self) -> String {
        let used_gb = self.used_bytes as f64 / 1e9;
        let capacity_gb = self.capacity_mb as f64 / 1e3;
        let filled = (self.percent() / 10) as usize;
        format!(
            "{used_gb:.2} of {capacity_gb} GB [{}{}] {}%",
            "#".repeat(filled),
            "-".repeat(10 - filled),
            self.percent()
        )
    }
}

fn dir_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Painel que redesenha o estado agregado no terminal.
pub struct Dashboard {
    term: Term,
    symbol: String,
}

impl Dashboard {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            term: Term::stdout(),
            symbol: symbol.into(),
        }
    }

    // Cor fixa por módulo; módulos desconhecidos saem em ciano.
    fn module_style(name: &str) -> Style {
        match name {
            "Storage" => Style::new().magenta().bold(),
            "Delivery" => Style::new().blue().bold(),
            "AI" => Style::new().green().bold(),
            "Transcoding" => Style::new().yellow().bold(),
            _ => Style::new().cyan().bold(),
        }
    }

    /// Monta as linhas do painel para um snapshot. O uso de disco, quando
    /// medido, aparece na linha do módulo Storage.
    pub fn render(&self, snapshot: &Snapshot, disk: Option<&DiskUsage>) -> Vec<String> {
        let dim = Style::new().dim();
        let mut lines = Vec::new();

        for module in &snapshot.modules {
            let status = if module.status.is_empty() {
                "-"
            } else {
                module.status.as_str()
            };
            let mut line = format!(
                "{:<14} {:<14} {} {} Rewards",
                Self::module_style(module.name()).apply_to(module.name()),
                dim.apply_to(status),
                Style::new().bold().apply_to(module.reward),
                self.symbol
            );
            if let (Some(disk), "Storage") = (disk, module.name()) {
                line.push_str(&format!("   {}", dim.apply_to(disk.label())));
            }
            lines.push(line);
        }

        let balance = &snapshot.balance;
        let balance_style = if balance.balance.is_negative() {
            Style::new().red()
        } else {
            Style::new().green()
        };
        lines.push(String::new());
        lines.push(format!(
            "Balance        {} {}",
            balance_style.apply_to(balance.balance),
            self.symbol
        ));
        lines.push(format!(
            "               {}  Total Rewards",
            Style::new().yellow().apply_to(balance.total_rewards)
        ));
        lines.push(format!(
            "               {}  Withdrawn",
            Style::new().red().apply_to(balance.withdrawn)
        ));
        lines.push(String::new());

        let registration = match snapshot.registration {
            RegistrationStatus::AwaitingRegistration => Style::new()
                .red()
                .bold()
                .apply_to(snapshot.registration.to_string())
                .to_string(),
            _ => dim.apply_to(snapshot.registration.to_string()).to_string(),
        };
        let polled = snapshot
            .last_poll
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        lines.push(format!("Node: {registration}   last poll: {polled}"));
        lines.push(dim.apply_to("[s] stop   [q] quit").to_string());
        lines
    }

    /// Limpa a tela e desenha o snapshot.
    pub fn draw(&self, snapshot: &Snapshot, disk: Option<&DiskUsage>) {
        let lines = self.render(snapshot, disk);
        if let Err(e) = self
            .term
            .clear_screen()
            .and_then(|_| self.term.write_line(&lines.join("\n")))
        {
            tracing::debug!(error = %e, "dashboard redraw failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BalanceUpdate, ModuleSpec, StateReconciler, Tokens};
    use std::time::Instant;

    const TOKEN: i128 = 1_000_000_000_000_000_000;

    fn plain(lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .map(|l| console::strip_ansi_codes(l).into_owned())
            .collect()
    }

    fn snapshot(withdrawn: i128) -> Snapshot {
        let specs = vec![ModuleSpec {
            name: "Storage".into(),
            reward_source: "storage".into(),
            initial_status: Some("Standby".into()),
            rule: None,
        }];
        let mut state = StateReconciler::new(&specs);
        state.seed(&specs, Instant::now());
        state.apply_balance(&BalanceUpdate {
            withdrawn: Tokens::from_base_units(withdrawn),
            earned: vec![("storage".into(), Tokens::from_base_units(2 * TOKEN))],
        });
        state.snapshot()
    }

    #[test]
    fn renders_modules_and_balance() {
        let dashboard = Dashboard::new("AIOZ");
        let lines = plain(&dashboard.render(&snapshot(TOKEN / 2), None));

        assert!(lines[0].starts_with("Storage"));
        assert!(lines[0].contains("Standby"));
        assert!(lines[0].contains("2.00000000 AIOZ Rewards"));
        assert!(lines.iter().any(|l| l.contains("1.50000000 AIOZ") && l.starts_with("Balance")));
        assert!(lines.iter().any(|l| l.contains("2.00000000  Total Rewards")));
        assert!(lines.iter().any(|l| l.contains("0.50000000  Withdrawn")));
        assert!(lines.iter().any(|l| l.contains("last poll: never")));
    }

    #[test]
    fn negative_balance_is_shown_as_is() {
        let dashboard = Dashboard::new("AIOZ");
        let lines = plain(&dashboard.render(&snapshot(3 * TOKEN), None));
        assert!(lines.iter().any(|l| l.contains("-1.00000000 AIOZ")));
    }

    #[test]
    fn degraded_mode_is_surfaced() {
        let mut snap = snapshot(0);
        snap.registration = RegistrationStatus::AwaitingRegistration;
        let lines = plain(&Dashboard::new("AIOZ").render(&snap, None));
        assert!(lines.iter().any(|l| l.contains("awaiting registration")));
    }

    #[test]
    fn storage_row_shows_disk_usage() {
        let disk = DiskUsage {
            used_bytes: 77_470_000_000,
            capacity_mb: 200_000,
        };
        assert_eq!(disk.percent(), 38);
        let lines = plain(&Dashboard::new("AIOZ").render(&snapshot(0), Some(&disk)));
        assert!(lines[0].contains("77.47 of 200 GB [###-------] 38%"));
    }

    #[test]
    fn disk_usage_is_clamped_and_zero_capacity_is_safe() {
        let full = DiskUsage {
            used_bytes: 5_000_000_000,
            capacity_mb: 1_000,
        };
        assert_eq!(full.percent(), 100);
        assert!(full.label().contains("[##########]"));
        let none = DiskUsage {
            used_bytes: 10,
            capacity_mb: 0,
        };
        assert_eq!(none.percent(), 0);
    }

    #[test]
    fn measures_nested_files_and_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 1500]).unwrap();
        std::fs::create_dir(dir.path().join("chunks")).unwrap();
        std::fs::write(dir.path().join("chunks/b.bin"), vec![0u8; 500]).unwrap();

        let usage = DiskUsage::measure(dir.path(), 1).unwrap();
        assert_eq!(usage.used_bytes, 2000);
        assert_eq!(usage.capacity_mb, 1);

        let missing = DiskUsage::measure(&dir.path().join("not-yet"), 1).unwrap();
        assert_eq!(missing.used_bytes, 0);
    }

    #[test]
    fn hidden_progress_does_not_print() {
        let progress = RegistrationProgress::start(false);
        progress.attempt(1, 15);
        progress.finish(RegistrationStatus::Registered);
    }
}
