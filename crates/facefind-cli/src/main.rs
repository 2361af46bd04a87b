use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facefind_core::PersonMetadata;
use facefind_engine::{spawn_engine, Config, FacefindService};
use facefind_vision::OnnxProvider;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facefind", about = "Missing-persons face registry CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person from a photo
    Enroll {
        /// Photo showing the person's face
        #[arg(short, long)]
        image: PathBuf,
        /// Person's name
        #[arg(short, long)]
        name: String,
        /// Extra metadata, e.g. --field district=Pune (repeatable)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Match the faces in a photo against registered persons
    Match {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Show a person by ID
    Show { id: i64 },
    /// Find persons by name (case-insensitive)
    Find { name: String },
    /// List every registered person
    List,
    /// Show configuration and registry size
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let output = match cli.command {
        Commands::Enroll {
            image,
            name,
            fields,
        } => {
            let mut metadata = PersonMetadata::default();
            for (field, value) in &fields {
                if !metadata.set(field, value) {
                    bail!(
                        "unknown field '{field}'; expected one of: {}",
                        PersonMetadata::FIELDS.join(", ")
                    );
                }
            }
            metadata.set("name", &name);

            let service = open_service(&config)?;
            let enrollment = service.enroll(read_image(&image)?, metadata).await?;
            json!({
                "status": "success",
                "message": format!(
                    "{} registered with ID {}",
                    enrollment.display_name, enrollment.identity_id
                ),
                "image_path": enrollment.image_path.to_string_lossy(),
            })
        }
        Commands::Match { image } => {
            let service = open_service(&config)?;
            let matches = service.identify(read_image(&image)?).await?;
            if matches.is_empty() {
                json!({ "matches": [], "message": "No known faces matched" })
            } else {
                json!({ "matches": matches })
            }
        }
        Commands::Show { id } => {
            let service = open_service(&config)?;
            match service.person_by_id(id).await? {
                Some(identity) => serde_json::to_value(identity)?,
                None => not_found(),
            }
        }
        Commands::Find { name } => {
            if name.trim().is_empty() {
                bail!("name must not be blank");
            }
            let service = open_service(&config)?;
            let people = service.persons_by_name(&name).await?;
            if people.is_empty() {
                not_found()
            } else {
                serde_json::to_value(people)?
            }
        }
        Commands::List => {
            let service = open_service(&config)?;
            json!({ "persons": service.all_registered().await? })
        }
        Commands::Status => {
            let service = open_service(&config)?;
            let persons = service.all_registered().await?.len();
            let matcher = service.matcher();
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "provider": service.engine().provider_name(),
                "db_path": config.db_path.display().to_string(),
                "image_dir": config.image_dir.display().to_string(),
                "persons": persons,
                "tolerance": matcher.tolerance,
                "min_confidence": matcher.min_confidence,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn open_service(config: &Config) -> Result<FacefindService> {
    let provider = OnnxProvider::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    let engine = spawn_engine(provider)?;
    Ok(FacefindService::open(config, engine)?)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn not_found() -> serde_json::Value {
    json!({ "status": "success", "message": "Not found" })
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing field name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("district=Pune").unwrap(),
            ("district".to_string(), "Pune".to_string())
        );
        assert_eq!(
            parse_field("other_details=a=b").unwrap(),
            ("other_details".to_string(), "a=b".to_string())
        );
        assert!(parse_field("district").is_err());
        assert!(parse_field("=Pune").is_err());
    }

    #[test]
    fn test_cli_parses_enroll() {
        let cli = Cli::try_parse_from([
            "facefind", "enroll", "--image", "a.jpg", "--name", "Asha", "--field", "sex=F",
            "-f", "religion=None",
        ])
        .unwrap();
        match cli.command {
            Commands::Enroll { name, fields, .. } => {
                assert_eq!(name, "Asha");
                assert_eq!(fields.len(), 2);
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_cli_rejects_non_integer_id() {
        assert!(Cli::try_parse_from(["facefind", "show", "abc"]).is_err());
    }
}
