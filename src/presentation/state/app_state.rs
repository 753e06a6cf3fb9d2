use std::sync::Arc;

use tokio::sync::mpsc;

use crate::application::services::{
    CatalogService, ChatAgent, ExtractionMessage, JobLedger, RetrievalService,
};
use crate::presentation::config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<JobLedger>,
    pub chat_agent: Arc<ChatAgent>,
    pub retrieval_service: Arc<RetrievalService>,
    pub catalog_service: Arc<CatalogService>,
    pub extraction_sender: mpsc::Sender<ExtractionMessage>,
    pub settings: Settings,
}
