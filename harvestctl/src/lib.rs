use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;

use harvest_core::{
    load_harvest_config, BrowserLauncher, ChromiumSurfaceFactory, Credentials, Harvester, HttpSink,
    JobRequest, SqliteSessionStore,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] harvest_core::ConfigError),
    #[error("job error: {0}")]
    Job(#[from] harvest_core::JobError),
    #[error("session store error: {0}")]
    Store(#[from] harvest_core::StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Harvest command-line control interface", long_about = None)]
pub struct Cli {
    /// Caminho do harvest.toml principal
    #[arg(long, default_value = "configs/harvest.toml")]
    pub config: PathBuf,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Executa um workflow de exportação contra o site configurado
    Export(ExportArgs),
    /// Operações sobre sessões persistidas
    #[command(subcommand)]
    Session(SessionCommands),
    /// Gera script de autocompletar para o shell informado
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Nome do workflow (configurado ou embutido)
    pub workflow: String,
    /// Parâmetros do workflow no formato chave=valor
    #[arg(long = "param", value_name = "CHAVE=VALOR")]
    pub params: Vec<String>,
    /// Identidade de login (fallback: HARVEST_IDENTITY)
    #[arg(long)]
    pub identity: Option<String>,
    /// Segredo de login (fallback: HARVEST_SECRET)
    #[arg(long)]
    pub secret: Option<String>,
    /// Endpoint HTTP que recebe o artefato exportado
    #[arg(long)]
    pub sink: Option<String>,
    /// Arquivo local onde gravar os bytes do artefato
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Lista sessões persistidas por domínio
    List,
    /// Remove a sessão persistida de um domínio
    Clear(SessionClearArgs),
}

#[derive(Args, Debug)]
pub struct SessionClearArgs {
    /// Domínio do site (ex.: app.smartscout.com)
    pub domain: String,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell alvo
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Export(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            let report = runtime.block_on(run_export(&cli, args))?;
            render(&report, cli.format)
        }
        Commands::Session(SessionCommands::List) => {
            let rows = session_list(&cli)?;
            render(&rows, cli.format)
        }
        Commands::Session(SessionCommands::Clear(args)) => {
            let report = session_clear(&cli, args)?;
            render(&report, cli.format)
        }
        Commands::Completions(args) => {
            clap_complete::generate(
                args.shell,
                &mut Cli::command(),
                "harvestctl",
                &mut io::stdout(),
            );
            Ok(())
        }
    }
}

async fn run_export(cli: &Cli, args: &ExportArgs) -> Result<ExportReport> {
    let config = Arc::new(load_harvest_config(&cli.config)?);
    let launcher = BrowserLauncher::new(config.browser.clone(), config.work_dir().join("profiles"));
    let factory = Arc::new(ChromiumSurfaceFactory::new(launcher));
    let mut harvester = Harvester::new(Arc::clone(&config), factory)?;
    if let Some(endpoint) = &args.sink {
        harvester = harvester.with_sink(Arc::new(HttpSink::new(endpoint)));
    }

    let request = JobRequest {
        workflow: args.workflow.clone(),
        params: parse_params(&args.params)?,
        credentials: credentials_from(args)?,
    };
    let outcome = harvester.submit(request).await?;

    let output = match (&args.output, &outcome.bytes) {
        (Some(path), Some(bytes)) => {
            tokio::fs::write(path, bytes).await?;
            Some(path.display().to_string())
        }
        _ => None,
    };

    Ok(ExportReport {
        job_id: outcome.job_id.to_string(),
        workflow: outcome.workflow,
        restored_session: outcome.restored_session,
        steps_completed: outcome.steps.iter().filter(|s| !s.skipped()).count(),
        steps_skipped: outcome.steps.iter().filter(|s| s.skipped()).count(),
        artifact_name: outcome.artifact_name,
        artifact_size: outcome.artifact_size,
        output,
        dispatched: outcome.dispatched,
        warnings: outcome.warnings,
        duration_ms: outcome.duration_ms,
    })
}

fn open_store(cli: &Cli) -> Result<SqliteSessionStore> {
    let config = load_harvest_config(&cli.config)?;
    let store = SqliteSessionStore::new(config.session_db());
    store.initialize()?;
    Ok(store)
}

fn session_list(cli: &Cli) -> Result<Vec<SessionRow>> {
    let store = open_store(cli)?;
    Ok(store
        .domains()?
        .into_iter()
        .map(|session| SessionRow {
            domain: session.domain,
            cookies: session.cookies.len(),
            captured_at: session.captured_at.to_rfc3339(),
        })
        .collect())
}

fn session_clear(cli: &Cli, args: &SessionClearArgs) -> Result<ClearReport> {
    let store = open_store(cli)?;
    let removed = store.clear(&args.domain)?;
    Ok(ClearReport {
        domain: args.domain.clone(),
        removed,
    })
}

fn parse_params(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    for entry in raw {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            AppError::InvalidParam(format!("esperado chave=valor, recebido: {entry}"))
        })?;
        if key.is_empty() {
            return Err(AppError::InvalidParam(format!(
                "chave vazia em parâmetro: {entry}"
            )));
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

fn credentials_from(args: &ExportArgs) -> Result<Option<Credentials>> {
    let identity = args
        .identity
        .clone()
        .or_else(|| std::env::var("HARVEST_IDENTITY").ok());
    let secret = args
        .secret
        .clone()
        .or_else(|| std::env::var("HARVEST_SECRET").ok());
    match (identity, secret) {
        (Some(identity), Some(secret)) => Ok(Some(Credentials { identity, secret })),
        (None, None) => Ok(None),
        _ => Err(AppError::InvalidParam(
            "identidade e segredo devem ser informados juntos".to_string(),
        )),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct ExportReport {
    pub job_id: String,
    pub workflow: String,
    pub restored_session: bool,
    pub steps_completed: usize,
    pub steps_skipped: usize,
    pub artifact_name: Option<String>,
    pub artifact_size: Option<u64>,
    pub output: Option<String>,
    pub dispatched: Option<bool>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl DisplayFallback for ExportReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("job {} ({})", self.job_id, self.workflow),
            format!(
                "sessão: {}",
                if self.restored_session {
                    "restaurada"
                } else {
                    "login novo"
                }
            ),
            format!(
                "passos: {} concluídos, {} pulados",
                self.steps_completed, self.steps_skipped
            ),
        ];
        match (&self.artifact_name, self.artifact_size) {
            (Some(name), Some(size)) => lines.push(format!("artefato: {name} ({size} bytes)")),
            _ => lines.push("artefato: nenhum".to_string()),
        }
        if let Some(output) = &self.output {
            lines.push(format!("gravado em: {output}"));
        }
        if let Some(dispatched) = self.dispatched {
            lines.push(format!(
                "despacho: {}",
                if dispatched { "ok" } else { "falhou" }
            ));
        }
        for warning in &self.warnings {
            lines.push(format!("aviso: {warning}"));
        }
        lines.push(format!("duração: {}ms", self.duration_ms));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct SessionRow {
    pub domain: String,
    pub cookies: usize,
    pub captured_at: String,
}

impl DisplayFallback for Vec<SessionRow> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "nenhuma sessão persistida".to_string();
        }
        self.iter()
            .map(|row| {
                format!(
                    "{}  {} cookies  capturada em {}",
                    row.domain, row.cookies, row.captured_at
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ClearReport {
    pub domain: String,
    pub removed: bool,
}

impl DisplayFallback for ClearReport {
    fn display(&self) -> String {
        if self.removed {
            format!("sessão de {} removida", self.domain)
        } else {
            format!("nenhuma sessão persistida para {}", self.domain)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn params_parse_into_a_map() {
        let params = parse_params(&[
            "search_text=Garden Hoses".to_string(),
            "page=2".to_string(),
        ])
        .expect("valid params");
        assert_eq!(params.get("search_text").map(String::as_str), Some("Garden Hoses"));
        assert_eq!(params.get("page").map(String::as_str), Some("2"));
    }

    #[test]
    fn params_without_separator_are_rejected() {
        assert!(parse_params(&["broken".to_string()]).is_err());
        assert!(parse_params(&["=value".to_string()]).is_err());
    }

    #[test]
    fn credentials_require_both_halves() {
        let args = ExportArgs {
            workflow: "niche-finder-export".to_string(),
            params: Vec::new(),
            identity: Some("ops@example.com".to_string()),
            secret: None,
            sink: None,
            output: None,
        };
        assert!(credentials_from(&args).is_err());
    }
}
