use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use pipeline_core::{
    BoardSnapshot, DragError, DragSession, HttpCrmRemote, HttpRemoteOptions, Pipeline,
    PipelineEvent,
};
use rust_decimal::Decimal;
use shared::{
    domain::{ContactId, DealId, DealInput},
    stages::StageKey,
    timestamp,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser, Debug)]
#[command(name = "pipeline", about = "Sales pipeline board for the CRM API")]
struct Cli {
    /// Settings file; defaults to ./pipeline.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every stage column with its deals and totals.
    Board,
    /// Move a deal to another stage and commit it to the server.
    Move { deal_id: String, stage: String },
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        value: Decimal,
        #[arg(long)]
        close_date: String,
        #[arg(long)]
        contact_id: String,
        #[arg(long, default_value = "prospect")]
        stage: StageKey,
        #[arg(long)]
        description: Option<String>,
    },
    /// Server-side dashboard counters.
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = config::load_settings(cli.config.as_deref())?;
    if let Some(api_url) = cli.api_url {
        settings.api_url = api_url;
    }
    if let Some(token) = cli.token {
        settings.api_token = Some(token);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let mut options =
        HttpRemoteOptions::new(&settings.api_url).with_timeout(settings.request_timeout());
    if let Some(token) = &settings.api_token {
        options = options.with_token(token);
    }
    let remote = HttpCrmRemote::new(options)?;
    info!(api_root = remote.api_root(), "using crm api");
    let pipeline = Pipeline::new(Arc::new(remote));

    match cli.command {
        Command::Board => {
            pipeline.refresh().await?;
            print_board(&pipeline.snapshot().await);
        }
        Command::Move { deal_id, stage } => {
            pipeline.refresh().await?;
            let mut events = pipeline.subscribe_events();
            let deal = pipeline.deal(&DealId::new(deal_id)).await?;

            let mut session = DragSession::new();
            session.begin(&deal)?;
            let result = session.drop_on(&pipeline, &stage).await;

            while let Ok(event) = events.try_recv() {
                if let PipelineEvent::TransitionRolledBack {
                    deal_id,
                    restored,
                    attempted,
                    ..
                } = event
                {
                    warn!(%deal_id, %restored, %attempted, "move reverted");
                }
            }

            let moved = match result {
                Ok(moved) => moved,
                Err(DragError::Transition(err)) => {
                    if let Some(restored) = err.original_stage() {
                        println!("deal stays in {}", restored.label());
                    }
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            };
            println!("moved {} to {}", moved.id, moved.stage.label());
            print_board(&pipeline.snapshot().await);
        }
        Command::Create {
            title,
            value,
            close_date,
            contact_id,
            stage,
            description,
        } => {
            let expected_close_date = timestamp::parse(&close_date)
                .ok_or_else(|| anyhow!("unrecognised close date '{close_date}'"))?;
            let deal = pipeline
                .create_deal(DealInput {
                    title,
                    value,
                    expected_close_date,
                    contact_id: ContactId::new(contact_id),
                    stage,
                    description,
                })
                .await
                .context("could not create deal")?;
            println!("created deal_id={} in {}", deal.id, deal.stage.label());
        }
        Command::Summary => {
            let local = pipeline.refresh().await?;
            let summary = pipeline.dashboard_summary().await?;
            println!("leads:           {}", summary.total_leads);
            println!("contacts:        {}", summary.total_contacts);
            println!("deals:           {}", summary.total_deals);
            println!("won deals:       {}", summary.won_deals);
            println!("pipeline value:  {}", money(summary.pipeline_value));
            println!("conversion rate: {:.1}%", summary.conversion_rate);
            for (stage, count) in &summary.lead_stages_breakdown {
                println!("  leads {stage}: {count}");
            }
            println!(
                "board: {} open, {} won, {} lost, {:.1}% converted",
                local.open_count,
                local.won_count,
                local.lost_count,
                local.conversion_rate_percent()
            );
        }
    }

    Ok(())
}

fn print_board(snapshot: &BoardSnapshot) {
    for column in &snapshot.columns {
        println!(
            "== {} ({} deals, {}) ==",
            column.stage.label,
            column.metrics.deal_count,
            money(column.metrics.total_value)
        );
        for card in &column.cards {
            println!(
                "  [{}] {}  {}  {}  closes {}",
                card.deal.id,
                card.deal.title,
                money(card.deal.value),
                card.contact_name,
                card.deal.expected_close_date.format("%Y-%m-%d")
            );
        }
    }

    let metrics = &snapshot.metrics;
    println!(
        "open pipeline {} | won {} | conversion {:.1}%",
        money(metrics.pipeline_value),
        money(metrics.won_value),
        metrics.conversion_rate_percent()
    );
}

fn money(value: Decimal) -> String {
    format!("${}", value.round_dp(2))
}
