//! Command line front end: tokenize files and inspect the grammar registry

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fresh_textmate::primitives::grammar::{builtin_descriptors, LocalGrammarLoader};
use fresh_textmate::{GrammarRegistry, TextMateEngine, TokenSpan, TokenizerConfig};
use tracing_subscriber::EnvFilter;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "fresh-textmate")]
#[command(about = "Tokenize text with TextMate grammars", long_about = None)]
struct Args {
    /// Directory of additional `*.json` grammar descriptors
    #[arg(long, value_name = "DIR", global = true)]
    grammars: Option<PathBuf>,

    /// Tokenizer configuration file (JSON)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tokenize a file and print its spans
    Tokenize {
        /// Grammar name, extension or path used to pick the grammar
        #[arg(long, conflicts_with = "scope")]
        lang: Option<String>,

        /// Scope name of the grammar, e.g. `source.dogma`
        #[arg(long)]
        scope: Option<String>,

        /// Print spans as JSON
        #[arg(long)]
        json: bool,

        /// Merge adjacent spans with identical scopes
        #[arg(long)]
        merge: bool,

        /// File to tokenize
        file: PathBuf,
    },

    /// List registered scopes
    Scopes,

    /// List scopes that registered grammars need but that are not registered
    Missing,

    /// Resolve a grammar name, extension or path to a scope
    Flag {
        text: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let registry = load_registry(args.grammars.as_deref(), args.config.as_deref())?;
    let mut out = std::io::stdout().lock();

    match args.command {
        Command::Tokenize {
            lang,
            scope,
            json,
            merge,
            file,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let scope = pick_scope(&registry, scope, lang, &file, &text)?;

            let mut engine = TextMateEngine::new(registry.clone(), &scope)?;
            let mut spans = engine.highlight(&text)?;
            if merge {
                TextMateEngine::merge_adjacent_spans(&mut spans);
            }

            if json {
                serde_json::to_writer_pretty(&mut out, &spans)?;
                writeln!(out)?;
            } else {
                print_spans(&mut out, &text, &spans)?;
            }
        }
        Command::Scopes => {
            for scope in registry.scopes() {
                writeln!(out, "{scope}")?;
            }
        }
        Command::Missing => {
            for scope in registry.missing_dependencies() {
                writeln!(out, "{scope}")?;
            }
        }
        Command::Flag { text } => match registry.resolve_flag(&text) {
            Some(scope) => writeln!(out, "{scope}")?,
            None => bail!("no grammar registered for `{text}`"),
        },
    }

    Ok(())
}

fn load_registry(grammars: Option<&Path>, config: Option<&Path>) -> Result<GrammarRegistry> {
    let config = match config {
        Some(path) => TokenizerConfig::load_from_file(path)?,
        None => TokenizerConfig::default(),
    };

    let mut registry = GrammarRegistry::with_config(config)
        .register(builtin_descriptors()?)
        .context("Failed to register built-in grammars")?;

    if let Some(dir) = grammars {
        registry = registry
            .load(&LocalGrammarLoader::new(dir))
            .with_context(|| format!("Failed to load grammars from {}", dir.display()))?;
    }

    let missing = registry.missing_dependencies();
    if !missing.is_empty() {
        tracing::warn!("missing grammar dependencies: {}", missing.join(", "));
    }
    Ok(registry)
}

/// Explicit scope first, then `--lang`, then the file name, then the first line
fn pick_scope(
    registry: &GrammarRegistry,
    scope: Option<String>,
    lang: Option<String>,
    file: &Path,
    text: &str,
) -> Result<String> {
    if let Some(scope) = scope {
        return Ok(scope);
    }
    if let Some(lang) = lang {
        return registry
            .resolve_flag(&lang)
            .map(str::to_string)
            .with_context(|| format!("no grammar registered for `{lang}`"));
    }

    let by_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| registry.resolve_flag(name));
    let first_line = text.lines().next().unwrap_or_default();
    match by_name.or_else(|| registry.scope_for_first_line(first_line)) {
        Some(scope) => Ok(scope.to_string()),
        None => bail!(
            "cannot tell the language of {}; pass --lang or --scope",
            file.display()
        ),
    }
}

fn print_spans(out: &mut impl Write, text: &str, spans: &[TokenSpan]) -> Result<()> {
    for span in spans {
        writeln!(
            out,
            "{:>6}..{:<6} {:<24} {}",
            span.range.start,
            span.range.end,
            format!("{:?}", &text[span.range.clone()]),
            span.scopes.join(" ")
        )?;
    }
    Ok(())
}
