//! `storyloom chat`: Single-message chat.
//!
//! The reply streams to stdout as it arrives. Thread and turn ids go to
//! stderr so the thread can be continued with `--conversation` or `--work`.

use anyhow::Context;
use clap::Args;
use storyloom_agent::{ChatRequest, build_chat_service};
use storyloom_config::AppConfig;
use storyloom_core::{ChatMessage, ThreadKind, WriterSink};

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// The message to send
    #[arg(short, long)]
    pub message: String,

    /// Model id: a provider name, `provider/model`, or a model of the default provider
    #[arg(long)]
    pub model: Option<String>,

    /// User the thread belongs to
    #[arg(short, long, env = "STORYLOOM_USER", default_value = "local")]
    pub user: String,

    /// Continue an existing conversation
    #[arg(long, value_name = "ID", conflicts_with = "work")]
    pub conversation: Option<String>,

    /// Write in a work; without an id a new work is started
    #[arg(long, value_name = "ID", num_args = 0..=1, default_missing_value = "")]
    pub work: Option<String>,
}

impl ChatArgs {
    fn thread(&self) -> (ThreadKind, Option<String>) {
        let non_empty = |id: &String| (!id.trim().is_empty()).then(|| id.clone());
        match (&self.conversation, &self.work) {
            (Some(id), _) => (ThreadKind::Conversation, non_empty(id)),
            (None, Some(id)) => (ThreadKind::Work, non_empty(id)),
            (None, None) => (ThreadKind::Conversation, None),
        }
    }
}

pub async fn run(args: ChatArgs) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let service = build_chat_service(&config)
        .await
        .context("Failed to start chat service")?;

    let (kind, thread_id) = args.thread();
    let model = args
        .model
        .clone()
        .unwrap_or_else(|| config.default_provider.clone());
    let request = ChatRequest::new(&args.user, model, vec![ChatMessage::user(&args.message)])
        .on_thread(kind, thread_id);

    let mut sink = WriterSink::new(tokio::io::stdout());
    let mut outcome = service.send_message(request, &mut sink).await?;
    println!();

    // The process exits right after; let indexing land first.
    outcome.wait_for_indexing().await;

    eprintln!();
    eprintln!("  Thread:  {} {} ({})", outcome.thread.kind, outcome.thread_id(), outcome.title);
    eprintln!("  Turn:    {}", outcome.assistant_turn_id);

    let report = &outcome.report;
    if let Some(e) = &report.provider_error {
        eprintln!("  Warning: model stream failed: {e}");
    }
    if let Some(e) = &report.client_error {
        eprintln!("  Warning: output interrupted: {e}");
    }
    if report.unsaved_chars > 0 {
        eprintln!("  Warning: {} characters were not saved", report.unsaved_chars);
    }

    Ok(())
}
