use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};

mod bootstrap;
mod commands;
mod config;

#[derive(Parser)]
#[command(name = "ppm")]
#[command(about = "Multi-step approval workflows for PPM entities", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a workflow definition from a JSON file
    #[command(name = "definition:create")]
    DefinitionCreate {
        /// Path to the definition JSON
        path: PathBuf,
    },

    /// List active workflow definitions
    #[command(name = "definition:list")]
    DefinitionList {
        /// Only definitions of this organization (plus global ones)
        #[arg(long)]
        org: Option<String>,
    },

    /// Start a workflow instance for an entity
    #[command(name = "workflow:start")]
    Start {
        /// Workflow definition id
        workflow_id: i64,
        /// Entity type (project, change_request, ...)
        entity_type: String,
        /// Entity id
        entity_id: String,
        /// User starting the workflow
        #[arg(long)]
        initiator: String,
        /// Organization override
        #[arg(long)]
        org: Option<String>,
        /// Extra context as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Approve the current step
    #[command(name = "workflow:approve")]
    Approve {
        instance_id: i64,
        #[arg(long = "as")]
        approver: String,
        #[arg(long)]
        comments: Option<String>,
    },

    /// Reject the current step
    #[command(name = "workflow:reject")]
    Reject {
        instance_id: i64,
        #[arg(long = "as")]
        approver: String,
        #[arg(long)]
        comments: Option<String>,
    },

    /// Hand a pending approval to someone else
    #[command(name = "workflow:delegate")]
    Delegate {
        instance_id: i64,
        #[arg(long = "as")]
        approver: String,
        /// User receiving the approval
        #[arg(long)]
        to: String,
        #[arg(long)]
        comments: Option<String>,
    },

    /// Cancel a running workflow
    #[command(name = "workflow:cancel")]
    Cancel {
        instance_id: i64,
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Re-drive an instance whose follow-up work did not finish
    #[command(name = "workflow:resume")]
    Resume {
        instance_id: i64,
        #[arg(long = "as", default_value = "system")]
        actor: String,
    },

    /// Show an instance with its current step
    #[command(name = "workflow:status")]
    Status { instance_id: i64 },

    /// Audit trail of an instance
    #[command(name = "workflow:history")]
    History { instance_id: i64 },

    /// Approvals and notifications waiting on a user
    #[command(name = "workflow:inbox")]
    Inbox { user_id: String },

    /// Apply rejection policies to timed out approvals
    #[command(name = "workflow:sweep")]
    Sweep {
        #[arg(long = "as", default_value = "system")]
        actor: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ppm::Config::init(Path::new("."));
    config::register_all();
    ppm::logging::init(&ppm::Config::get::<ppm::LogConfig>().unwrap_or_default());

    let services = match bootstrap::boot().await {
        Ok(services) => services,
        Err(e) => fail(e),
    };

    let result = match cli.command {
        Commands::DefinitionCreate { path } => {
            commands::definition::create(&services.engine, &path).await
        }
        Commands::DefinitionList { org } => {
            commands::definition::list(&services.engine, org.as_deref()).await
        }
        Commands::Start {
            workflow_id,
            entity_type,
            entity_id,
            initiator,
            org,
            metadata,
        } => {
            commands::workflow::start(
                &services.engine,
                workflow_id,
                entity_type,
                entity_id,
                initiator,
                org,
                metadata.as_deref(),
            )
            .await
        }
        Commands::Approve {
            instance_id,
            approver,
            comments,
        } => {
            commands::decision::run(&services.engine, instance_id, approver, "approved", comments)
                .await
        }
        Commands::Reject {
            instance_id,
            approver,
            comments,
        } => {
            commands::decision::run(&services.engine, instance_id, approver, "rejected", comments)
                .await
        }
        Commands::Delegate {
            instance_id,
            approver,
            to,
            comments,
        } => {
            commands::decision::delegate(&services.engine, instance_id, &approver, &to, comments)
                .await
        }
        Commands::Cancel {
            instance_id,
            actor,
            reason,
        } => commands::workflow::cancel(&services.engine, instance_id, &actor, reason).await,
        Commands::Resume { instance_id, actor } => {
            commands::workflow::resume(&services.engine, instance_id, &actor).await
        }
        Commands::Status { instance_id } => {
            commands::workflow::status(&services.engine, instance_id).await
        }
        Commands::History { instance_id } => {
            commands::inbox::history(&services.db, instance_id).await
        }
        Commands::Inbox { user_id } => {
            commands::inbox::run(&services.engine, &services.db, &user_id).await
        }
        Commands::Sweep { actor } => commands::workflow::sweep(&services.engine, &actor).await,
    };

    if let Err(e) = result {
        fail(e);
    }
}

fn fail(error: ppm::WorkflowError) -> ! {
    eprintln!("{} {}", style("Error:").red().bold(), error);
    eprintln!("{}", style(error.to_json()).dim());
    std::process::exit(1);
}
