// Public modules
pub mod config;
pub mod digest;
pub mod error;
pub mod io;
pub mod judge;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod publisher;
pub mod retry;
pub mod selection;
pub mod source;
pub mod summarizer;

// Re-export commonly used types
pub use config::{Config, RunSettings};
pub use digest::{digest_filename, DigestAssembler, MarkdownDigest};
pub use error::{CallError, ConfigurationError, FetchError, JudgeError, SummarizerError};
pub use io::{get_default_data_dir, load_seen, save_report, save_seen, seen_file};
pub use judge::{Judge, RelevanceJudge};
pub use llm::{ClaudeClient, LanguageModel};
pub use models::{
    ArticleCandidate, CandidateKey, PreferenceProfile, RejectReason, RelevanceEvaluation,
    SelectionOutcome, Summary,
};
pub use pipeline::{DigestPipeline, RunReport, SelectionMode};
pub use publisher::{Publisher, VaultPublisher};
pub use retry::RetryPolicy;
pub use selection::SelectionEngine;
pub use source::{ArticleSource, JsonFileSource, WebSource};
pub use summarizer::Summarizer;
