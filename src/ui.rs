//! Interface de terminal do propval: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! um relatório enquanto o cliente consulta o servidor.

use std::collections::HashSet;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::poller::PollOutcome;
use crate::state_machine::Agent;
use crate::status::StatusReport;

/// Indicador visual de progresso para a geração de um relatório.
///
/// A barra vai de 0 a 100 acompanhando o `progress` do servidor; cada agente
/// concluído é anunciado uma única vez em verde.
pub struct JobProgress {
    pb: ProgressBar,
    // Agentes já anunciados como concluídos.
    announced: HashSet<Agent>,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia a barra com o id do relatório e o endereço.
    pub fn start(id: &str, address: &str) -> Self {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        pb.set_message(format!("Queued: {address}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.println(format!("  Report {id}"));

        Self {
            pb,
            announced: HashSet::new(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza posição e mensagem a partir de uma resposta de status.
    pub fn update(&mut self, report: &StatusReport) {
        self.pb.set_position(u64::from(report.progress));
        self.pb.set_message(report.message.clone());

        let Some(details) = &report.agent_details else {
            return;
        };
        for (agent, activity) in details.activities() {
            if let Some(activity) = activity
                && activity.ends_with("complete")
                && self.announced.insert(agent)
            {
                self.pb
                    .println(format!("  {} {activity}", self.green.apply_to("✓")));
            }
        }
    }

    /// Finaliza a barra e exibe o resultado da consulta.
    pub fn finish(&self, id: &str, outcome: &PollOutcome) {
        self.pb.finish_and_clear();
        match outcome {
            PollOutcome::Complete(report) => {
                println!("  {} {}: {id}", self.green.apply_to("✓"), report.message);
                println!("    propval fetch {id}");
            }
            PollOutcome::Failed { report, can_retry } => {
                let agent = report
                    .error_agent()
                    .map(|a| a.title())
                    .unwrap_or("Pipeline");
                println!(
                    "  {} {agent} failed: {}",
                    self.red.apply_to("✗"),
                    report.message
                );
                if let Some(secs) = report.retry_after {
                    println!(
                        "    {}",
                        self.yellow
                            .apply_to(format!("Rate limited; wait {secs}s before retrying"))
                    );
                }
                if *can_retry {
                    println!("    propval retry {id}");
                }
            }
            PollOutcome::NotFound => {
                println!("  {} Report not found: {id}", self.red.apply_to("✗"));
            }
            PollOutcome::Connectivity(err) => {
                println!(
                    "  {} Lost contact with the server: {err}",
                    self.red.apply_to("✗")
                );
                println!("    The report may still be running; try `propval watch {id}`");
            }
            PollOutcome::Cancelled => {
                println!("  {} Stopped watching {id}", self.yellow.apply_to("■"));
            }
        }
    }
}

/// Imprime uma resposta de status em JSON com estilo colorido.
pub fn print_status(report: &StatusReport) {
    let style = if report.complete {
        Style::new().green().bold()
    } else if report.is_error() || !report.success {
        Style::new().red().bold()
    } else {
        Style::new().yellow()
    };
    println!("{}", style.apply_to("─── Report Status ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(report).unwrap_or_default()
    );
}
