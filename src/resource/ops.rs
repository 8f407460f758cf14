//! Resource Operations
//!
//! Drives create/read/update/delete/list for one descriptor: maps state to
//! parameters, queues the calls and maps responses back into state.

use super::fetcher::{paginate, Page};
use super::registry::ResourceDescriptor;
use crate::call::{CallChain, CallDescriptor, ChainOutcome, Operation, RetryPolicy};
use crate::error::{EngineError, Result};
use crate::mapping::{
    items_at, value_at, MapMode, ParamMap, RequestMapper, ResponseMapper, SharedNaming,
};
use crate::remote::{ErrorClassifier, RemoteClient};
use crate::schema::ResourceState;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ResourceOps<C: RemoteClient + ?Sized + 'static> {
    descriptor: Arc<ResourceDescriptor>,
    client: Arc<C>,
    request: RequestMapper,
    response: ResponseMapper,
    policy: RetryPolicy,
    classifier: Arc<ErrorClassifier>,
    page_size: Option<usize>,
}

impl<C: RemoteClient + ?Sized + 'static> ResourceOps<C> {
    pub fn new(descriptor: Arc<ResourceDescriptor>, client: Arc<C>) -> Self {
        Self {
            descriptor,
            client,
            request: RequestMapper::default(),
            response: ResponseMapper::default(),
            policy: RetryPolicy::default(),
            classifier: Arc::new(ErrorClassifier::default()),
            page_size: None,
        }
    }

    pub fn with_naming(mut self, naming: SharedNaming) -> Self {
        self.request = RequestMapper::new(naming.clone());
        self.response = ResponseMapper::new(naming);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Override the descriptor's page size for list calls
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn chain(&self) -> CallChain {
        CallChain::new(self.policy, self.classifier.clone())
    }

    fn call(&self, operation: Operation, action: String, params: ParamMap) -> CallDescriptor {
        CallDescriptor::remote(self.client.clone(), operation, action, params)
    }

    /// Parameters the create call would send
    pub fn create_params(&self, state: &ResourceState) -> Result<ParamMap> {
        let d = &self.descriptor;
        self.request
            .map(state, d.tree(), d.transforms(), MapMode::Create)
    }

    /// Parameters the update call would send; empty when nothing changed
    pub fn update_params(&self, state: &ResourceState) -> Result<ParamMap> {
        let d = &self.descriptor;
        self.request
            .map(state, d.tree(), d.transforms(), MapMode::Update)
    }

    /// Create the entity, adopt its new identity and refresh from a read
    pub async fn create(&self, state: &mut ResourceState) -> Result<ChainOutcome> {
        let d = &self.descriptor;
        let action = d.action("create", d.actions.create.as_ref())?;
        let params = self.create_params(state)?;

        let identity = d.identity.clone();
        let create = self
            .call(Operation::Create, action, params)
            .after_call(move |state, response| {
                let id = match value_at(response, &identity.response_path) {
                    Some(Value::String(s)) if !s.is_empty() => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => {
                        return Err(EngineError::MissingIdentity {
                            field: identity.field.clone(),
                        })
                    }
                };
                state.load(&identity.field, Value::String(id.clone()));
                state.set_id(id);
                Ok(())
            });

        let mut chain = self.chain().then(create);
        if d.actions.read.is_some() {
            chain.push(self.read_call(Operation::Refresh)?);
        }

        let outcome = chain.run(state).await?;
        state.mark_clean();
        tracing::info!(
            "created {} {}",
            d.key,
            state.id().unwrap_or("<unknown>")
        );
        Ok(outcome)
    }

    /// Read by identity; a [`Operation::Refresh`] fails rather than
    /// clearing the identity when the entity is not returned
    fn read_call(&self, operation: Operation) -> Result<CallDescriptor> {
        let d = &self.descriptor;
        let action = d.action("read", d.actions.read.as_ref())?;
        let param = d
            .read
            .param
            .clone()
            .unwrap_or_else(|| d.identity.param.clone());
        let identity_field = d.identity.field.clone();
        let descriptor = self.descriptor.clone();
        let response = self.response.clone();

        Ok(self
            .call(operation, action, ParamMap::new())
            .before_call(move |state, params| {
                let id = state.id().ok_or(EngineError::MissingIdentity {
                    field: identity_field,
                })?;
                params.insert(param, Value::String(id.to_string()));
                Ok(())
            })
            .after_call(move |state, raw| {
                let item = match &descriptor.read.items_path {
                    Some(path) => items_at(raw, path).first(),
                    None => Some(raw),
                };
                match item {
                    Some(item) => {
                        response.unmap_into(item, descriptor.tree(), descriptor.responses(), state)
                    }
                    None if operation == Operation::Refresh => Err(EngineError::NotReadBack {
                        resource: descriptor.key.clone(),
                        id: state.id().unwrap_or_default().to_string(),
                    }),
                    None => {
                        tracing::warn!("{} {:?} not returned by read", descriptor.key, state.id());
                        state.clear_id();
                        Ok(())
                    }
                }
            }))
    }

    /// Refresh state from the remote side
    ///
    /// Returns `false` when the entity no longer exists; its identity is
    /// cleared in that case.
    pub async fn read(&self, state: &mut ResourceState) -> Result<bool> {
        self.chain()
            .then(self.read_call(Operation::Read)?)
            .run(state)
            .await?;
        state.mark_clean();
        Ok(state.id().is_some())
    }

    /// Send changed fields, then refresh
    ///
    /// No update call is made when nothing changed.
    pub async fn update(&self, state: &mut ResourceState) -> Result<ChainOutcome> {
        let d = &self.descriptor;
        let action = d.action("update", d.actions.update.as_ref())?;
        let params = self.update_params(state)?;
        let mut chain = self.chain();

        if params.is_empty() {
            tracing::debug!("{}: no changes to send", d.key);
        } else {
            let identity = d.identity.clone();
            chain.push(
                self.call(Operation::Update, action, params)
                    .before_call(move |state, params| {
                        let id = state.id().ok_or(EngineError::MissingIdentity {
                            field: identity.field,
                        })?;
                        params.insert(identity.param, Value::String(id.to_string()));
                        Ok(())
                    }),
            );
        }
        if d.actions.read.is_some() {
            chain.push(self.read_call(Operation::Refresh)?);
        }

        let outcome = chain.run(state).await?;
        state.mark_clean();
        Ok(outcome)
    }

    /// Delete the entity; an entity that is already gone counts as deleted
    pub async fn delete(&self, state: &mut ResourceState) -> Result<ChainOutcome> {
        let d = &self.descriptor;
        let action = d.action("delete", d.actions.delete.as_ref())?;
        let id = state
            .id()
            .ok_or_else(|| EngineError::MissingIdentity {
                field: d.identity.field.clone(),
            })?
            .to_string();

        let mut params = ParamMap::new();
        params.insert(d.identity.param.clone(), Value::String(id.clone()));

        let outcome = self
            .chain()
            .then(self.call(Operation::Delete, action, params))
            .run(state)
            .await?;
        state.clear_id();

        if outcome.gone() {
            tracing::info!("{} {} was already gone", d.key, id);
        } else {
            tracing::info!("deleted {} {}", d.key, id);
        }
        Ok(outcome)
    }

    /// Fetch raw items from every page of the list action
    pub async fn list_raw(&self, filter: &ResourceState) -> Result<Vec<Value>> {
        let d = &self.descriptor;
        let action = d.action("list", d.actions.list.as_ref())?;
        let list = d.list.as_ref().ok_or_else(|| EngineError::InvalidDescriptor {
            resource: d.key.clone(),
            reason: "no list section declared".to_string(),
        })?;
        let initial = self
            .request
            .map(filter, d.tree(), d.transforms(), MapMode::Filter)?;

        let fetch_page = |params: ParamMap| {
            let call = self.call(Operation::List, action.clone(), params);
            let policy = self.policy;
            let classifier = self.classifier.clone();
            async move {
                let report = call
                    .execute(&mut ResourceState::new(), &policy, &classifier)
                    .await?;
                let response = report.response.unwrap_or(Value::Null);
                Ok::<_, EngineError>(match &list.pagination {
                    Some(p) => Page::from_response(
                        &response,
                        &list.items_path,
                        p.has_more_key.as_deref(),
                        p.marker_key.as_deref(),
                    ),
                    None => Page::from_response(&response, &list.items_path, None, None),
                })
            }
        };

        match &list.pagination {
            Some(pagination) => {
                paginate(&initial, &pagination.request(self.page_size), fetch_page).await
            }
            None => Ok(fetch_page(initial).await?.items),
        }
    }

    /// List every entity matching the filter
    pub async fn list(&self, filter: &ResourceState) -> Result<Vec<ResourceState>> {
        let d = &self.descriptor;
        let items = self.list_raw(filter).await?;
        self.response.unmap_list(&items, d.tree(), d.responses())
    }

    /// List keyed by identity; each state carries its identity
    pub async fn list_keyed(
        &self,
        filter: &ResourceState,
    ) -> Result<BTreeMap<String, ResourceState>> {
        let d = &self.descriptor;
        let items = self.list_raw(filter).await?;
        self.response
            .unmap_keyed(&items, d.tree(), d.responses(), &d.identity.field)
    }
}
