//! URL-safe slugs derived from source fields.

pub mod unique;
pub mod urlizer;

pub use unique::{next_unique, UniqueStep};

use tracing::debug;

use crate::config::SluggableConfig;
use crate::context::{FlushContext, PersistedSlug};
use crate::error::BehaviorError;
use crate::store::{BackingStore, Filter};
use crate::traits::{resolve_field, resolve_optional_field, FieldSlot, Managed};
use crate::uow::{assign_field, UnitOfWork};
use crate::value::FieldValue;

pub struct SluggableListener<M> {
    config: SluggableConfig,
    slug: FieldSlot<M>,
    sources: Vec<FieldSlot<M>>,
    unique_base: Option<FieldSlot<M>>,
}

impl<M: Managed> SluggableListener<M> {
    pub fn new(config: SluggableConfig) -> Result<Self, BehaviorError> {
        if config.source_columns().is_empty() {
            return Err(BehaviorError::configuration(format!(
                "slug `{}` of `{}` has no source fields",
                config.slug_column(),
                M::collection()
            )));
        }
        let slug = resolve_field::<M>(config.slug_column())?;
        let sources = config
            .source_columns()
            .iter()
            .map(|name| resolve_field::<M>(name))
            .collect::<Result<Vec<_>, _>>()?;
        let unique_base = resolve_optional_field::<M>(config.unique_base())?;
        Ok(Self {
            config,
            slug,
            sources,
            unique_base,
        })
    }

    pub fn config(&self) -> &SluggableConfig {
        &self.config
    }

    /// Generate slugs for scheduled insertions, then for updates whose
    /// sources or slug changed.
    pub async fn on_flush<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        for id in uow.scheduled_insertions() {
            self.generate(ctx, uow, store, &id, true).await?;
        }
        for id in uow.scheduled_updates() {
            self.generate(ctx, uow, store, &id, false).await?;
        }
        Ok(())
    }

    async fn generate<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        id: &FieldValue,
        inserting: bool,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let Some(object) = uow.object(id).cloned() else {
            return Ok(());
        };
        let changes = uow.change_set(id);
        let manual = changes.contains(self.slug.name())
            && self
                .slug
                .read(&object)
                .as_str()
                .is_some_and(|slug| !slug.trim().is_empty());
        if !inserting && !self.config.updatable() && !manual {
            return Ok(());
        }
        let sources_changed = self
            .sources
            .iter()
            .any(|slot| changes.contains(slot.name()));
        if !inserting && !manual && !sources_changed {
            return Ok(());
        }

        let text = if manual {
            self.slug.read(&object).to_string()
        } else {
            self.source_text(&object)
        };
        let Some(slug) = self.build(&text) else {
            if self.config.nullable() {
                return assign_field(uow, id, &self.slug, FieldValue::Null);
            }
            return Err(BehaviorError::unexpected(format!(
                "unable to find any non empty sluggable fields for slug `{}` of `{}`",
                self.slug.name(),
                M::collection()
            )));
        };

        let base = self
            .unique_base
            .as_ref()
            .map(|slot| slot.read(&object))
            .unwrap_or_default();
        let slug = if self.config.unique() {
            self.make_unique(ctx, store, id, &base, slug).await?
        } else {
            slug
        };

        debug!(collection = M::collection(), id = %id, slug = %slug, "slug generated");
        assign_field(uow, id, &self.slug, FieldValue::Text(slug.clone()))?;
        ctx.persisted_slugs.push(PersistedSlug {
            collection: M::collection(),
            slug,
            base,
        });
        Ok(())
    }

    fn source_text(&self, object: &M) -> String {
        let parts: Vec<String> = self
            .sources
            .iter()
            .filter_map(|slot| match slot.read(object) {
                FieldValue::Null => None,
                value => Some(value.to_string()),
            })
            .collect();
        parts.join(" ").trim().to_string()
    }

    /// Urlized, decorated and truncated slug; `None` when nothing is left.
    fn build(&self, text: &str) -> Option<String> {
        let separator = self.config.separator();
        let urlized = urlizer::urlize(text, separator);
        if urlized.is_empty() {
            return None;
        }
        let decorated = format!("{}{urlized}{}", self.config.prefix(), self.config.suffix());
        let mut slug = urlizer::stylize(&decorated, self.config.style(), separator);
        if let Some(max) = self.config.max_length() {
            slug = urlizer::truncate(&slug, max);
        }
        (!slug.is_empty()).then_some(slug)
    }

    async fn make_unique<S>(
        &self,
        ctx: &FlushContext,
        store: &S,
        id: &FieldValue,
        base: &FieldValue,
        slug: String,
    ) -> Result<String, BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        let mut scope = Filter::new().ne(M::identifier_field(), id.clone());
        if let Some(slot) = &self.unique_base {
            scope = scope.eq(slot.name(), base.clone());
        }

        let mut preferred = slug;
        let mut recursing = false;
        let mut exponent = 0;
        loop {
            let mut similar = store
                .find_similar(M::collection(), self.slug.name(), &preferred, &scope)
                .await?;
            similar.extend(
                ctx.persisted_slugs
                    .iter()
                    .filter(|persisted| persisted.collection == M::collection())
                    .filter(|persisted| self.unique_base.is_none() || persisted.base == *base)
                    .filter(|persisted| starts_with_ignore_case(&persisted.slug, &preferred))
                    .map(|persisted| persisted.slug.clone()),
            );

            match next_unique(
                &preferred,
                &similar,
                self.config.separator(),
                recursing,
                exponent,
                self.config.max_length(),
            )? {
                UniqueStep::Found(slug) => return Ok(slug),
                UniqueStep::Retry {
                    base,
                    exponent: next,
                } => {
                    preferred = base;
                    recursing = true;
                    exponent = next;
                }
            }
        }
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
