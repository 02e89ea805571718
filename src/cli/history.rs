use anyhow::{anyhow, Result};

use crate::store::{SqliteTranscriptStore, TranscriptStore};

use super::HistoryCliArgs;

pub fn handle_history_command(args: HistoryCliArgs) -> Result<()> {
    let store = SqliteTranscriptStore::open_default()?;

    // If a record id is given, print the whole transcript
    if let Some(id) = args.show {
        let record = store
            .retrieve(id)?
            .ok_or_else(|| anyhow!("Transcript with ID {} not found", id))?;

        println!("ID: {}", id);
        println!("Title: {}", record.title.as_deref().unwrap_or("Untitled"));
        println!("Status: {}", record.status);
        if let Some(summary) = &record.summary {
            println!("\nSummary:\n{}", summary);
        }
        if let Some(notes) = &record.notes {
            println!("\nNotes:\n{}", notes);
        }
        if let Some(transcript) = &record.transcript_text {
            println!("\nTranscript:\n{}", transcript);
        }
        return Ok(());
    }

    // Otherwise, search and display results
    let records = match args.query.as_deref() {
        Some(query) if !query.trim().is_empty() => store.search(query, args.limit, 0)?,
        _ => store.list(args.limit, 0)?,
    };

    if records.is_empty() {
        println!("No transcripts found matching your criteria.");
        return Ok(());
    }

    println!("Found {} transcript(s):\n", records.len());

    for record in records {
        let title = record.title.as_deref().unwrap_or("Untitled");
        let text = record.transcript_text.as_deref().unwrap_or("");

        // Truncate long text for display
        let display_text: String = if text.chars().count() > 100 {
            let head: String = text.chars().take(100).collect();
            format!("{}...", head)
        } else {
            text.to_string()
        };

        println!("ID: {}", record.id);
        println!("Title: {}", title);
        println!("Date: {}", record.started_at);
        println!("Status: {}", record.status);
        if !display_text.is_empty() {
            println!("Text: {}", display_text);
        }
        println!("---");
    }

    println!("\nTo view a full transcript, use: confab history --show <ID>");

    Ok(())
}
