use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use server_api::auth::{mint_viewer_token, AuthConfig};
use shared::domain::{ComplaintId, NewComplaint, OfficeId, Status, UserId, Viewer};
use storage::{ComplaintFilter, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/complaints.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a complaint received outside the intake channel.
    Intake {
        protocol: String,
        category: String,
        description: String,
        #[arg(long)]
        citizen_name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        office_id: Option<i64>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        neighborhood: Option<String>,
    },
    List {
        #[arg(long)]
        office_id: Option<i64>,
        /// Status label, e.g. "Em andamento".
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    Show {
        complaint_id: i64,
    },
    Summary {
        #[arg(long)]
        office_id: Option<i64>,
    },
    /// Print a bearer token for an admin or an office user.
    MintToken {
        user_id: i64,
        #[arg(long, conflicts_with = "admin")]
        office_id: Option<i64>,
        #[arg(long)]
        admin: bool,
        #[arg(long, env = "APP__JWT_SECRET", default_value = "devsecret")]
        jwt_secret: String,
        #[arg(long, default_value_t = 8 * 3600)]
        ttl_seconds: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::MintToken {
        user_id,
        office_id,
        admin,
        jwt_secret,
        ttl_seconds,
    } = &cli.command
    {
        let viewer = match (*admin, *office_id) {
            (true, _) => Viewer::admin(UserId(*user_id)),
            (false, Some(office_id)) => Viewer::office(UserId(*user_id), OfficeId(office_id)),
            (false, None) => bail!("pass --admin or --office-id"),
        };
        let cfg = AuthConfig {
            jwt_secret: jwt_secret.clone(),
            ttl_seconds: *ttl_seconds,
        };
        println!("{}", mint_viewer_token(&cfg, &viewer)?);
        return Ok(());
    }

    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Intake {
            protocol,
            category,
            description,
            citizen_name,
            phone,
            office_id,
            address,
            neighborhood,
        } => {
            let complaint = storage
                .insert_complaint(&NewComplaint {
                    protocol,
                    category,
                    description,
                    address,
                    neighborhood,
                    citizen_name,
                    citizen_phone: phone,
                    office_id: office_id.map(OfficeId),
                })
                .await?;
            println!(
                "registered complaint_id={} protocol={}",
                complaint.id, complaint.protocol
            );
        }
        Command::List {
            office_id,
            status,
            limit,
        } => {
            let status = match status.as_deref() {
                Some(label) => match Status::from_label(label) {
                    Some(status) => Some(status),
                    None => bail!("unknown status '{label}'"),
                },
                None => None,
            };
            let complaints = storage
                .list_complaints(ComplaintFilter {
                    office_scope: office_id.map(|id| Some(OfficeId(id))),
                    status,
                    limit,
                })
                .await?;
            for complaint in complaints {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    complaint.id,
                    complaint.protocol,
                    complaint.status,
                    complaint
                        .deadline
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".into()),
                    if complaint.response_sent {
                        "respondida"
                    } else {
                        "-"
                    }
                );
            }
        }
        Command::Show { complaint_id } => match storage
            .load_complaint(ComplaintId(complaint_id))
            .await?
        {
            Some(complaint) => println!("{}", serde_json::to_string_pretty(&complaint)?),
            None => bail!("complaint {complaint_id} not found"),
        },
        Command::Summary { office_id } => {
            let summary = storage
                .status_summary(office_id.map(|id| Some(OfficeId(id))))
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::MintToken { .. } => {}
    }

    Ok(())
}
