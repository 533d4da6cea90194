//! Automations the agent registers at startup.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use client_core::{
    ChangeFilter, ConfigError, ControlBehavior, ControlContext, ControlInfo, ControlTypeRegistry,
    Controller, Debouncer, NamedHandler, RetryWithReset,
};
use serde_json::{json, Value};
use shared::domain::ControlId;
use tracing::{debug, info};

pub const VMIX: &str = "vmix";

const VOLUME_STEP: i64 = 5;
const VOLUME_SEND_SPACING: Duration = Duration::from_millis(150);
const PREVIEW_ATTEMPTS: u32 = 3;
const PREVIEW_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Shows its page name and iteration; lit while held.
#[derive(Default)]
pub struct LabelButton;

#[async_trait]
impl ControlBehavior for LabelButton {
    async fn on_create(&self, ctx: &ControlContext) -> anyhow::Result<()> {
        let page = ctx.page_name().await.unwrap_or_else(|| "page".into());
        ctx.set_text(format!("{page}\\n#{}", ctx.iteration().await))
            .await
    }

    async fn on_press(&self, ctx: &ControlContext) -> anyhow::Result<()> {
        ctx.set_bg_color(0.8, 0.0, 0.0).await
    }

    async fn on_release(&self, ctx: &ControlContext) -> anyhow::Result<()> {
        ctx.set_bg_color(0.0, 0.0, 0.0).await
    }
}

struct VolumeRequest {
    controller: Controller,
    input: i64,
    level: i64,
}

type VolumeSender = Debouncer<ControlId, VolumeRequest, Option<Value>>;

/// Rotary control for the volume of input `iteration + 1`.
///
/// Rotations update the label immediately; the level itself is sent through a
/// debouncer so fast spinning produces few `SetVolume` actions.
pub struct VolumeKnob {
    level: AtomicI64,
    sender: VolumeSender,
}

impl VolumeKnob {
    fn new(sender: VolumeSender) -> Self {
        Self {
            level: AtomicI64::new(100),
            sender,
        }
    }

    fn step(&self, clockwise: bool) -> i64 {
        let delta = if clockwise { VOLUME_STEP } else { -VOLUME_STEP };
        let previous = self
            .level
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |level| {
                Some((level + delta).clamp(0, 100))
            })
            .unwrap_or_else(|level| level);
        (previous + delta).clamp(0, 100)
    }
}

#[async_trait]
impl ControlBehavior for VolumeKnob {
    async fn on_create(&self, ctx: &ControlContext) -> anyhow::Result<()> {
        let input = ctx.iteration().await + 1;
        ctx.set_text(format!("IN {input}\\n{}%", self.level.load(Ordering::SeqCst)))
            .await
    }

    async fn on_rotate(&self, ctx: &ControlContext, clockwise: bool) -> anyhow::Result<()> {
        let level = self.step(clockwise);
        let input = ctx.iteration().await + 1;
        ctx.set_text(format!("IN {input}\\n{level}%")).await?;

        let request = VolumeRequest {
            controller: ctx.controller().clone(),
            input,
            level,
        };
        self.sender.call(ctx.control_id().clone(), request).await?;
        Ok(())
    }
}

pub fn control_types() -> Result<ControlTypeRegistry, ConfigError> {
    let volume: VolumeSender = Debouncer::new(VOLUME_SEND_SPACING, |request: VolumeRequest| async move {
        request
            .controller
            .action(
                VMIX,
                "SetVolume",
                json!({ "input": request.input, "value": request.level }),
                true,
            )
            .await
            .map_err(anyhow::Error::from)
    });

    let mut types = ControlTypeRegistry::new();
    types.register_default::<LabelButton>("LabelButton")?;
    types.register("VolumeKnob", move |_info: &ControlInfo| {
        VolumeKnob::new(volume.clone())
    })?;
    Ok(types)
}

pub async fn register_handlers(controller: &Controller) -> Result<(), ConfigError> {
    controller
        .on_change(
            "internal",
            ChangeFilter::variable("time_s"),
            NamedHandler::new("clock", |event| async move {
                debug!(time_s = %event.value, "controller clock");
                Ok(())
            }),
        )
        .await?;

    controller
        .on_connect(
            VMIX,
            NamedHandler::new("vmix ready", |event| async move {
                info!(status = %event.value, "vmix is ready");
                Ok(())
            }),
        )
        .await;

    let gated = controller.requires(
        &[VMIX],
        NamedHandler::new("input titles", |event| async move {
            info!(variable = %event.variable, title = %event.value, "input title changed");
            Ok(())
        }),
    );
    controller
        .on_change(VMIX, ChangeFilter::regex(r"input_\d+_title"), gated)
        .await?;

    // The input that just left program is cued on preview.
    let preview: RetryWithReset<&'static str, (Controller, Value), Option<Value>> = RetryWithReset::new(
        PREVIEW_ATTEMPTS,
        PREVIEW_RETRY_DELAY,
        |(controller, input): (Controller, Value)| async move {
            controller
                .action(VMIX, "PreviewInput", json!({ "input": input }), true)
                .await
                .map_err(anyhow::Error::from)
        },
    )?;
    let handle = controller.clone();
    controller
        .on_change(
            VMIX,
            ChangeFilter::variable("program"),
            NamedHandler::new("preview follows program", move |event| {
                let preview = preview.clone();
                let controller = handle.clone();
                async move {
                    let Some(last) = event.last else {
                        return Ok(());
                    };
                    match preview.call("preview", (controller, last)).await {
                        Ok(_) => Ok(()),
                        Err(err) if err.is_cancelled() => Ok(()),
                        Err(err) => Err(anyhow::Error::new(err)),
                    }
                }
            }),
        )
        .await?;

    Ok(())
}

#[cfg(test)]
#[path = "tests/demo_tests.rs"]
mod tests;
