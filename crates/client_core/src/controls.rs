use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::{ControlId, GridPosition, IteratorMode},
    protocol::ControlData,
};

use crate::{error::ConfigError, Controller};

/// Live attributes of one registered control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    pub control_id: ControlId,
    pub type_tag: String,
    pub page: u32,
    pub position: GridPosition,
    pub iterator: IteratorMode,
    pub iteration: i64,
    pub manual_iteration: Option<i64>,
}

impl ControlInfo {
    pub fn from_data(data: &ControlData, type_tag: &str) -> Self {
        let mut info = Self {
            control_id: data.control_id.clone(),
            type_tag: type_tag.to_string(),
            page: data.location.page_number,
            position: data.location.position(),
            iterator: IteratorMode::Manual,
            iteration: data.options.manual_iteration.unwrap_or(0),
            manual_iteration: None,
        };
        info.apply(data);
        info
    }

    /// Takes over location and iterator options. The iteration index only
    /// changes here for manual controls; everything else is recomputed.
    pub(crate) fn apply(&mut self, data: &ControlData) {
        self.page = data.location.page_number;
        self.position = data.location.position();
        self.iterator = data.options.iterator.clone();
        self.manual_iteration = data.options.manual_iteration;
        if self.iterator == IteratorMode::Manual {
            self.iteration = self.manual_iteration.unwrap_or(0);
        }
    }

    pub fn row(&self) -> i32 {
        self.position.row
    }

    pub fn column(&self) -> i32 {
        self.position.column
    }

    /// `page/row/column`, the form the controller accepts as a location target.
    pub fn location_text(&self) -> String {
        format!("{}/{}/{}", self.page, self.position.row, self.position.column)
    }
}

/// Behavior of a control type. Every hook defaults to doing nothing.
#[async_trait]
pub trait ControlBehavior: Send + Sync + 'static {
    async fn on_create(&self, _ctx: &ControlContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_press(&self, _ctx: &ControlContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_release(&self, _ctx: &ControlContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_rotate(&self, _ctx: &ControlContext, _clockwise: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type ControlFactory = Arc<dyn Fn(&ControlInfo) -> Arc<dyn ControlBehavior> + Send + Sync>;

/// Explicit type tag -> factory table, filled once at startup.
#[derive(Default, Clone)]
pub struct ControlTypeRegistry {
    factories: HashMap<String, ControlFactory>,
}

impl ControlTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, B>(&mut self, tag: impl Into<String>, factory: F) -> Result<(), ConfigError>
    where
        F: Fn(&ControlInfo) -> B + Send + Sync + 'static,
        B: ControlBehavior,
    {
        let tag = tag.into();
        if self.factories.contains_key(&tag) {
            return Err(ConfigError::DuplicateControlType(tag));
        }
        self.factories.insert(
            tag,
            Arc::new(move |info: &ControlInfo| Arc::new(factory(info)) as Arc<dyn ControlBehavior>),
        );
        Ok(())
    }

    pub fn register_default<B>(&mut self, tag: impl Into<String>) -> Result<(), ConfigError>
    where
        B: ControlBehavior + Default,
    {
        self.register(tag, |_info: &ControlInfo| B::default())
    }

    pub fn build(&self, tag: &str, info: &ControlInfo) -> Option<Arc<dyn ControlBehavior>> {
        self.factories.get(tag).map(|factory| factory(info))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for ControlTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.tags().collect();
        tags.sort_unstable();
        f.debug_struct("ControlTypeRegistry")
            .field("tags", &tags)
            .finish()
    }
}

/// Handle given to control hooks: the control's identity plus the controller.
#[derive(Clone)]
pub struct ControlContext {
    controller: Controller,
    control_id: ControlId,
    type_tag: String,
}

impl ControlContext {
    pub(crate) fn new(controller: Controller, control_id: ControlId, type_tag: String) -> Self {
        Self {
            controller,
            control_id,
            type_tag,
        }
    }

    pub fn control_id(&self) -> &ControlId {
        &self.control_id
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Current attributes, or `None` once the control has been removed.
    pub async fn info(&self) -> Option<ControlInfo> {
        self.controller.control(&self.control_id).await
    }

    pub async fn iteration(&self) -> i64 {
        self.info().await.map(|info| info.iteration).unwrap_or(0)
    }

    pub async fn page_name(&self) -> Option<String> {
        let info = self.info().await?;
        let value = self
            .controller
            .var("internal", &format!("page_number_{}_name", info.page))
            .await?;
        Some(match value {
            Value::String(name) => name,
            other => other.to_string(),
        })
    }

    async fn location_text(&self) -> anyhow::Result<String> {
        self.info()
            .await
            .map(|info| info.location_text())
            .ok_or_else(|| anyhow!("control {} is no longer registered", self.control_id))
    }

    async fn at_location(&self, action_id: &str, mut options: Value) -> anyhow::Result<()> {
        options["location_target"] = json!("text");
        options["location_text"] = json!(self.location_text().await?);
        self.controller
            .action("internal", action_id, options, false)
            .await?;
        Ok(())
    }

    async fn on_this(&self, action_id: &str, force: Option<bool>) -> anyhow::Result<()> {
        let mut options = json!({
            "location_target": "this",
            "location_text": "",
            "location_expression": "",
        });
        if let Some(force) = force {
            options["force"] = json!(force);
        }
        self.controller
            .action("internal", action_id, options, true)
            .await?;
        Ok(())
    }

    pub async fn set_text(&self, text: impl fmt::Display) -> anyhow::Result<()> {
        self.at_location("button_text", json!({ "label": text.to_string() }))
            .await
    }

    /// Components are clamped to `0.0..=1.0`.
    pub async fn set_bg_color(&self, r: f64, g: f64, b: f64) -> anyhow::Result<()> {
        self.at_location("bgcolor", json!({ "color": rgb_to_int(r, g, b).to_string() }))
            .await
    }

    pub async fn set_text_color(&self, r: f64, g: f64, b: f64) -> anyhow::Result<()> {
        self.at_location("textcolor", json!({ "color": rgb_to_int(r, g, b).to_string() }))
            .await
    }

    pub async fn trigger_press(&self, force: bool) -> anyhow::Result<()> {
        self.on_this("button_press", Some(force)).await
    }

    pub async fn trigger_release(&self, force: bool) -> anyhow::Result<()> {
        self.on_this("button_release", Some(force)).await
    }

    pub async fn trigger_press_release(&self, force: bool) -> anyhow::Result<()> {
        self.on_this("button_pressrelease", Some(force)).await
    }

    pub async fn trigger_rotate_left(&self) -> anyhow::Result<()> {
        self.on_this("button_rotate_left", None).await
    }

    pub async fn trigger_rotate_right(&self) -> anyhow::Result<()> {
        self.on_this("button_rotate_right", None).await
    }
}

impl fmt::Debug for ControlContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlContext")
            .field("control_id", &self.control_id)
            .field("type_tag", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// Packs 0..1 colour components into the controller's `0xRRGGBB` integer.
pub fn rgb_to_int(r: f64, g: f64, b: f64) -> u32 {
    let channel = |value: f64| (value.clamp(0.0, 1.0) * 255.0).round() as u32;
    (channel(r) << 16) | (channel(g) << 8) | channel(b)
}

#[cfg(test)]
#[path = "tests/controls_tests.rs"]
mod tests;
