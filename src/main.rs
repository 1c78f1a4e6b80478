use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use menu_admin::models::{EntityKind, TabularFormat, UploadedImage};
use menu_admin::services::ConfigService;
use menu_admin::{init_logger, log_error, AdminApi, LogConfig, Result};

#[derive(Parser)]
#[command(name = "menu-admin", about = "Restaurant menu back office tools")]
struct Cli {
    /// Directory holding settings.json (defaults to the user config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Log level for console output
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import dishes or categories from a .csv or .xlsx file
    Import {
        #[arg(value_enum)]
        kind: KindArg,
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        admin_id: i64,
    },
    /// Export dishes or categories
    Export {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long, value_enum, default_value = "xlsx")]
        format: FormatArg,
        /// Directory the export is written to
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Write an import template (CSV)
    Template {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Replace the image of a dish
    UploadImage {
        dish_id: i64,
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        admin_id: i64,
    },
    /// Backfill placeholders, colours and AVIF copies for existing images
    RegenerateImages,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Dishes,
    Categories,
}

impl From<KindArg> for EntityKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Dishes => EntityKind::Dish,
            KindArg::Categories => EntityKind::Category,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Xlsx,
}

impl From<FormatArg> for TabularFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => TabularFormat::Csv,
            FormatArg::Xlsx => TabularFormat::Xlsx,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig::console(cli.log_level.clone());
    if let Err(e) = init_logger(Some(log_config)) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error!(error = %e, "Command failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config_dir {
        Some(dir) => ConfigService::new_with_dir(dir)?,
        None => ConfigService::new()?,
    };
    let settings = config.load_settings().await?;
    let api = AdminApi::open(settings)?;

    match cli.command {
        Command::Import {
            kind,
            file,
            admin_id,
        } => {
            let content = tokio::fs::read(&file).await?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let response = api.import(admin_id, kind.into(), &filename, content).await?;

            println!("Создано: {}, обновлено: {}", response.created, response.updated);
            for error in &response.errors {
                println!("  {}", error);
            }
        }
        Command::Export {
            kind,
            format,
            out_dir,
        } => {
            let export = api.export(kind.into(), format.into()).await?;
            let path = out_dir.join(&export.filename);
            tokio::fs::write(&path, &export.bytes).await?;
            println!("{}", path.display());
        }
        Command::Template { kind, out_dir } => {
            let template = api.template(kind.into())?;
            let path = out_dir.join(&template.filename);
            tokio::fs::write(&path, &template.bytes).await?;
            println!("{}", path.display());
        }
        Command::UploadImage {
            dish_id,
            file,
            admin_id,
        } => {
            let bytes = tokio::fs::read(&file).await?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let images = api
                .upload_dish_image(admin_id, dish_id, UploadedImage { filename, bytes })
                .await?;
            println!("{}", serde_json::to_string_pretty(&images)?);
        }
        Command::RegenerateImages => {
            let report = api.regenerate_images().await?;
            println!(
                "Обновлено: {}, пропущено: {}, ошибок: {}",
                report.updated, report.skipped, report.failed
            );
        }
    }

    Ok(())
}
