//! Request creation, listing and processing commands.

use tokio::runtime::Runtime;

use super::{build_engine, open_db};
use crate::config::Config;
use crate::db::RequestStore;
use crate::fulfillment::ProcessOutcome;
use crate::model::{ContentType, NewRequest, Request, RequestStatus};

pub struct RequestArgs<'a> {
    pub title: &'a str,
    pub artist: Option<&'a str>,
    pub album: Option<&'a str>,
    pub kind: ContentType,
    pub external_id: Option<&'a str>,
    pub owner: &'a str,
    pub process: bool,
}

/// Create the database and run migrations
pub fn cmd_init_db(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        open_db(config).await?;
        println!("Database ready: {}", config.database_url());
        Ok(())
    })
}

/// Create a request, optionally processing it right away
pub fn cmd_request(rt: &Runtime, config: &Config, args: RequestArgs<'_>) -> anyhow::Result<()> {
    rt.block_on(async {
        let engine = build_engine(config).await?;
        let created = engine
            .create_request(NewRequest {
                owner: args.owner.to_string(),
                content_type: Some(args.kind),
                title: args.title.to_string(),
                artist: args.artist.map(String::from),
                album: args.album.map(String::from),
                external_id: args.external_id.map(String::from),
            })
            .await?;

        println!("Created request #{}", created.request.id);
        if let Some(entry) = &created.library_match {
            println!(
                "Already in library: {} ({})",
                entry.title,
                entry.path.as_deref().unwrap_or(&entry.library_id)
            );
            return Ok(());
        }

        if args.process {
            let outcome = engine.process(created.request.id).await?;
            print_outcome(created.request.id, &outcome);
        }
        Ok(())
    })
}

/// List requests, optionally filtered
pub fn cmd_list(
    rt: &Runtime,
    config: &Config,
    owner: Option<&str>,
    status: Option<RequestStatus>,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let store = RequestStore::new(open_db(config).await?);
        let mut requests = match (owner, status) {
            (Some(owner), _) => store.list_by_owner(owner).await?,
            (None, Some(status)) => store.list_by_status(status).await?,
            (None, None) => store.list_all().await?,
        };
        if let (Some(_), Some(status)) = (owner, status) {
            requests.retain(|r| r.status == status);
        }

        if requests.is_empty() {
            println!("No requests.");
            return Ok(());
        }
        println!("{:>5}  {:<11}  {:<6}  {:<10}  TITLE", "ID", "STATUS", "KIND", "OWNER");
        for request in &requests {
            println!(
                "{:>5}  {:<11}  {:<6}  {:<10}  {}",
                request.id,
                request.status,
                request.content_type,
                request.owner,
                display_title(request)
            );
        }
        Ok(())
    })
}

/// Show one request in full
pub fn cmd_show(rt: &Runtime, config: &Config, id: i64) -> anyhow::Result<()> {
    rt.block_on(async {
        let store = RequestStore::new(open_db(config).await?);
        let request = store
            .get(id)
            .await?
            .ok_or(crate::error::Error::RequestNotFound(id))?;
        print_request(&request);
        Ok(())
    })
}

/// Run the fulfillment pipeline for one request
pub fn cmd_process(rt: &Runtime, config: &Config, id: i64) -> anyhow::Result<()> {
    rt.block_on(async {
        let engine = build_engine(config).await?;
        let outcome = engine.process(id).await?;
        print_outcome(id, &outcome);
        Ok(())
    })
}

/// Recover interrupted requests, then process every pending one
pub fn cmd_process_pending(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let engine = build_engine(config).await?;
        let recovered = engine.recover_interrupted().await?;
        if recovered > 0 {
            println!("Marked {} interrupted request(s) as failed", recovered);
        }

        let outcomes = engine.process_pending().await?;
        if outcomes.is_empty() {
            println!("Nothing pending.");
        }
        for (id, outcome) in &outcomes {
            print_outcome(*id, outcome);
        }

        let completed = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ProcessOutcome::Completed(_) | ProcessOutcome::Available(_)))
            .count();
        println!("\nCompleted: {} of {}", completed, outcomes.len());
        Ok(())
    })
}

/// Fail requests left mid-flight by a crashed run
pub fn cmd_recover(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let engine = build_engine(config).await?;
        let recovered = engine.recover_interrupted().await?;
        println!("Recovered {} request(s)", recovered);
        Ok(())
    })
}

fn display_title(request: &Request) -> String {
    match &request.artist {
        Some(artist) => format!("{} - {}", artist, request.title),
        None => request.title.clone(),
    }
}

fn print_outcome(id: i64, outcome: &ProcessOutcome) {
    match outcome {
        ProcessOutcome::Available(entry) => {
            println!("#{id}: already in library ({})", entry.library_id)
        }
        ProcessOutcome::Completed(request) => println!(
            "#{id}: completed -> {}",
            request.download_path.as_deref().unwrap_or("?")
        ),
        ProcessOutcome::Failed(request) => println!(
            "#{id}: FAILED{}: {}",
            if request.retryable { " (retryable)" } else { "" },
            request.failure_reason.as_deref().unwrap_or("unknown reason")
        ),
        ProcessOutcome::AlreadyInProgress => println!("#{id}: already in progress"),
        ProcessOutcome::NoOp(status) => println!("#{id}: nothing to do ({status})"),
        ProcessOutcome::Superseded(status) => {
            println!("#{id}: attempt abandoned, request is now {status}")
        }
    }
}

fn print_request(request: &Request) {
    println!("Request #{}", request.id);
    println!("  Owner:    {}", request.owner);
    println!("  Kind:     {}", request.content_type);
    println!("  Title:    {}", request.title);
    if let Some(artist) = &request.artist {
        println!("  Artist:   {}", artist);
    }
    if let Some(album) = &request.album {
        println!("  Album:    {}", album);
    }
    if let Some(id) = &request.external_id {
        println!("  MBID:     {}", id);
    }
    println!("  Status:   {}", request.status);
    if let (Some(service), Some(id)) = (&request.source_service, &request.source_id) {
        println!("  Source:   {} {}", service, id);
    }
    if let Some(reason) = &request.failure_reason {
        println!(
            "  Reason:   {}{}",
            reason,
            if request.retryable { " (retryable)" } else { "" }
        );
    }
    if let Some(path) = &request.download_path {
        println!("  Path:     {}", path);
    }
    if let Some(size) = request.file_size {
        println!("  Size:     {:.1} MB", size as f64 / 1_048_576.0);
    }
    println!("  Created:  {}", request.created_at.to_rfc3339());
    println!("  Updated:  {}", request.updated_at.to_rfc3339());
    if let Some(done) = request.completed_at {
        println!("  Done:     {}", done.to_rfc3339());
    }
}
