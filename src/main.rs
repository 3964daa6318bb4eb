use clap::Parser;
use std::fs;
use wqam::app;
use wqam::config::{AnalyzeArgs, Cli, Command, CreateAdminArgs};
use wqam::downloader::{to_pdf, to_xlsx};
use wqam::login::UserDirectory;
use wqam::pipeline::Analyzer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(config) => app::run(config).await?,
        Command::CreateAdmin(args) => create_admin(&args)?,
        Command::Analyze(args) => analyze(&args)?,
    }

    Ok(())
}

fn create_admin(args: &CreateAdminArgs) -> Result<(), Box<dyn std::error::Error>> {
    let users = UserDirectory::open(&args.users.database, &args.users.secret_key)?;
    let admin = users.provision_admin(&args.username, &args.password)?;
    println!("Administrator '{}' is active", admin.username);
    Ok(())
}

fn analyze(args: &AnalyzeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let analyzer = Analyzer::bootstrap(
        args.analysis.analysis_config.as_deref(),
        &args.analysis.model_path,
    )?;
    let contents = fs::read(&args.input)?;
    let filename = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    let report = analyzer.analyze(&contents, filename.as_deref(), &args.user)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = &args.pdf {
        fs::write(path, to_pdf(&report)?)?;
        log::info!("Wrote {}", path.display());
    }
    if let Some(path) = &args.xlsx {
        fs::write(path, to_xlsx(&report)?)?;
        log::info!("Wrote {}", path.display());
    }

    Ok(())
}
