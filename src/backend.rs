use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, warn};

use crate::completion::completions;
use crate::config::Settings;
use crate::diagnostics::diagnostics;
use crate::hover::hover;
use crate::loader;
use crate::schema::{DocKind, SchemaRegistry};
use crate::text::{Document, DocumentStore};
use crate::watcher::{Debouncer, WatchSet};

#[derive(Clone)]
pub struct Backend {
    pub(crate) client: Client,
    pub(crate) documents: Arc<DocumentStore>,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) settings: Arc<RwLock<Settings>>,
    pub(crate) workspace_roots: Arc<RwLock<Vec<PathBuf>>>,
    pub(crate) watches: Arc<WatchSet>,
    pub(crate) debouncer: Arc<Debouncer>,
    events: Arc<Mutex<Option<UnboundedReceiver<DocKind>>>>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client,
            documents: Arc::new(DocumentStore::default()),
            registry: Arc::new(SchemaRegistry::new()),
            settings: Arc::new(RwLock::new(Settings::default())),
            workspace_roots: Arc::new(RwLock::new(Vec::new())),
            watches: Arc::new(WatchSet::new(tx)),
            debouncer: Arc::new(Debouncer::new()),
            events: Arc::new(Mutex::new(Some(rx))),
            pump: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn update_workspace_roots(&self, params: &InitializeParams) {
        let mut roots = self.workspace_roots.write();
        roots.clear();

        if let Some(folders) = params.workspace_folders.as_ref() {
            for folder in folders {
                if let Ok(path) = folder.uri.to_file_path() {
                    if !roots.iter().any(|existing| existing == &path) {
                        roots.push(path);
                    }
                }
            }
        }

        if let Some(root_uri) = params.root_uri.as_ref() {
            if let Ok(path) = root_uri.to_file_path() {
                if !roots.iter().any(|existing| existing == &path) {
                    roots.push(path);
                }
            }
        }

        #[allow(deprecated)]
        if let Some(root_path) = params.root_path.as_ref() {
            if !root_path.is_empty() {
                let path = PathBuf::from(root_path);
                if !roots.iter().any(|existing| existing == &path) {
                    roots.push(path);
                }
            }
        }
    }

    fn is_energy_document(&self, uri: &Url) -> bool {
        self.settings.read().is_energy_beam_document(uri)
    }

    fn start_event_pump(&self) {
        let Some(mut events) = self.events.lock().take() else {
            return;
        };
        let backend = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(kind) = events.recv().await {
                backend.schedule_reload(kind);
            }
        });
        *self.pump.lock() = Some(handle);
    }

    pub(crate) fn schedule_reload(&self, kind: DocKind) {
        let delay = self.settings.read().debounce();
        let backend = self.clone();
        self.debouncer.schedule(kind, delay, move || async move {
            backend.reload_kind(kind).await;
        });
    }

    pub(crate) async fn reload_kind(&self, kind: DocKind) {
        let ticket = self.registry.begin_reload(kind);
        let source = {
            let settings = self.settings.read();
            let roots = self.workspace_roots.read();
            loader::try_resolve_source(kind, &settings, &roots)
        };

        let loaded = match source {
            Ok(path) => {
                let target = path.clone();
                match tokio::task::spawn_blocking(move || loader::try_load(kind, &target)).await {
                    Ok(result) => result.map(|records| (records, path)),
                    Err(err) => {
                        warn!(%kind, error = %err, "schema load task failed");
                        self.registry.fail(ticket);
                        self.revalidate_all().await;
                        return;
                    }
                }
            }
            Err(err) => Err(err),
        };

        match loaded {
            Ok((records, path)) => {
                let count = records.len();
                if self.registry.publish(ticket, records, Some(path)) {
                    debug!(%kind, count, generation = ticket.generation(), "schema published");
                }
            }
            Err(err) => {
                warn!(%kind, error = %err, "schema reload failed");
                self.registry.fail(ticket);
            }
        }

        self.refresh_watch(kind);
        self.revalidate_all().await;
    }

    fn refresh_watch(&self, kind: DocKind) {
        let target = {
            let settings = self.settings.read();
            let roots = self.workspace_roots.read();
            loader::watch_target(kind, &settings, &roots)
        };
        if let Err(err) = self.watches.replace(kind, target) {
            warn!(%kind, error = %err, "live reload disabled");
        }
    }

    async fn reload_all(&self) {
        for kind in DocKind::ALL {
            self.debouncer.cancel(kind);
            self.reload_kind(kind).await;
        }
    }

    async fn publish_diagnostics(&self, uri: &Url) {
        let result = {
            let Some(document) = self.documents.get(uri.as_str()) else {
                return;
            };
            if document.tree().is_none() {
                return;
            }
            let energy = self.is_energy_document(uri);
            (
                diagnostics(&document, &self.registry.view(), energy),
                document.version(),
            )
        };
        let (diagnostics, version) = result;
        self.client
            .publish_diagnostics(uri.clone(), diagnostics, version)
            .await;
    }

    async fn revalidate_all(&self) {
        let uris: Vec<String> = self
            .documents
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for uri in uris {
            if let Ok(uri) = Url::parse(&uri) {
                self.publish_diagnostics(&uri).await;
            }
        }
    }

    fn with_document<T>(
        &self,
        uri: &Url,
        position: Position,
        producer: impl FnOnce(&Document, usize, bool) -> Option<T>,
    ) -> Option<T> {
        let energy = self.is_energy_document(uri);
        let document = self.documents.get(uri.as_str())?;
        let offset = document.offset(position)?;
        producer(document.value(), offset, energy)
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        self.update_workspace_roots(&params);
        if let Some(settings) = params
            .initialization_options
            .as_ref()
            .and_then(Settings::from_json)
        {
            *self.settings.write() = settings;
        }

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "ability-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(
                        ["\"", ":", "[", "{", ","]
                            .iter()
                            .map(|c| c.to_string())
                            .collect(),
                    ),
                    ..CompletionOptions::default()
                }),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.start_event_pump();
        self.reload_all().await;

        let view = self.registry.view();
        let summary = DocKind::ALL
            .iter()
            .map(|&kind| {
                let snapshot = view.get(kind);
                if snapshot.is_fallback() {
                    format!("{}: built-in", kind.label())
                } else {
                    format!("{}: {}", kind.label(), snapshot.len())
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        info!(%summary, "ability-lsp initialized");
        self.client
            .log_message(
                MessageType::INFO,
                format!("Ability LSP initialized ({summary})"),
            )
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        self.debouncer.cancel_all();
        self.watches.shutdown();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let document =
            Document::new(params.text_document.text).with_version(params.text_document.version);
        self.documents.insert(uri.to_string(), document);
        self.publish_diagnostics(&uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;

        if let Some(change) = params.content_changes.into_iter().next() {
            let document = Document::new(change.text).with_version(params.text_document.version);
            self.documents.insert(uri.to_string(), document);
            self.publish_diagnostics(&uri).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.remove(uri.as_str());
        self.client.publish_diagnostics(uri, Vec::new(), None).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let Some(settings) = Settings::from_json(&params.settings) else {
            return;
        };
        let changed = {
            let mut current = self.settings.write();
            let changed = *current != settings;
            *current = settings;
            changed
        };

        if changed {
            info!("settings changed; reloading schemas");
            self.reload_all().await;
        } else {
            self.revalidate_all().await;
        }
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let view = self.registry.view();

        Ok(self.with_document(&uri, position, |document, offset, energy| {
            hover(document, offset, &view, energy)
        }))
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let view = self.registry.view();

        Ok(self
            .with_document(&uri, position, |document, offset, energy| {
                completions(document, offset, &view, energy)
            })
            .map(CompletionResponse::Array))
    }
}
