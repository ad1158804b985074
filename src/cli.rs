//! Interface de linha de comando do propval baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, submit, status,
//! watch, retry, fetch, validate) e flags globais (--server, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// propval: relatórios de avaliação de imóveis gerados por agentes de IA.
#[derive(Debug, Parser)]
#[command(name = "propval", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// URL base do servidor propval usado pelos comandos cliente.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8000")]
    pub server: String,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o servidor HTTP com o pipeline de agentes.
    Serve {
        /// Sobrescreve a porta configurada em `propval.toml`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Envia um endereço e acompanha o relatório até terminar.
    Submit {
        /// Endereço completo no Reino Unido, com código postal.
        address: String,

        /// Retorna logo após a criação do job, sem acompanhar o progresso.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },

    /// Mostra o status atual de um relatório.
    Status { id: String },

    /// Acompanha um relatório existente até terminar.
    Watch { id: String },

    /// Reenvia um relatório que falhou a partir do agente que falhou.
    Retry {
        id: String,

        /// Retorna sem acompanhar o novo job.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },

    /// Baixa o relatório concluído em Markdown ou PDF.
    Fetch {
        id: String,

        /// Arquivo de saída; por padrão imprime no terminal
        /// (ou grava `Property_Valuation_<id>.pdf` com `--pdf`).
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Baixa a versão em PDF.
        #[arg(long, default_value_t = false)]
        pdf: bool,
    },

    /// Valida e formata um endereço sem criar um relatório.
    Validate { address: String },
}
