//! Hook system for intercepting session events
//!
//! Hooks are registered per [`HookEvent`] in a [`HookRegistry`], optionally
//! scoped by a tool-name matcher. The [`HookPipeline`] runs the matching hooks
//! in registration order, bounds each one by a timeout, and short-circuits on
//! the first hook that returns `continue = false`.
//!
//! ```no_run
//! use kodegen_agent_sessions::hooks::{HookPipeline, HookRegistry};
//! use kodegen_agent_sessions::{HookEvent, HookFailurePolicy, HookOutput};
//! use std::time::Duration;
//!
//! let mut registry = HookRegistry::new();
//! registry.register(
//!     HookEvent::PreToolUse,
//!     Some("Bash"),
//!     "no-rm",
//!     HookRegistry::callback(|input| async move {
//!         let command = input.payload["command"].as_str().unwrap_or_default();
//!         if command.starts_with("rm ") {
//!             return Ok(HookOutput::stop("rm is not allowed"));
//!         }
//!         Ok(HookOutput::proceed())
//!     }),
//! );
//! let pipeline = HookPipeline::new(registry, Duration::from_secs(30), HookFailurePolicy::Continue);
//! ```

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};
use crate::types::hooks::{
    FnHook, Hook, HookDescriptor, HookEvent, HookFailurePolicy, HookInput, HookOutput,
};

/// Ordered hook registrations
#[derive(Clone, Default, Debug)]
pub struct HookRegistry {
    descriptors: Vec<HookDescriptor>,
}

impl HookRegistry {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Register a hook for an event
    ///
    /// # Arguments
    /// * `event` - Event to listen to
    /// * `matcher` - Tool matcher (`None` for all, `"*"`, `"Bash"`, `"Write|Edit"`)
    /// * `name` - Label used in execution records
    /// * `hook` - Handler
    pub fn register(
        &mut self,
        event: HookEvent,
        matcher: Option<&str>,
        name: impl Into<String>,
        hook: Arc<dyn Hook>,
    ) {
        self.descriptors.push(HookDescriptor {
            event,
            matcher: matcher.map(str::to_string),
            hook,
            name: name.into(),
        });
    }

    /// Number of registered hooks
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no hooks are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Hooks for `event` that match `tool_name`, in registration order
    pub fn matching<'a>(
        &'a self,
        event: HookEvent,
        tool_name: Option<&'a str>,
    ) -> impl Iterator<Item = &'a HookDescriptor> + 'a {
        self.descriptors.iter().filter(move |d| {
            d.event == event && (!event.is_tool_event() || Self::matches(d.matcher.as_deref(), tool_name))
        })
    }

    /// Check if a matcher matches a tool name
    ///
    /// ```
    /// use kodegen_agent_sessions::hooks::HookRegistry;
    ///
    /// assert!(HookRegistry::matches(Some("*"), Some("tool")));
    /// assert!(HookRegistry::matches(Some("Bash"), Some("Bash")));
    /// assert!(HookRegistry::matches(Some("Read|Write"), Some("Read")));
    /// assert!(!HookRegistry::matches(Some("Bash"), None));
    /// ```
    #[must_use]
    pub fn matches(matcher: Option<&str>, tool_name: Option<&str>) -> bool {
        match (matcher, tool_name) {
            (None, _) => true,
            (Some(pattern), Some(name)) => {
                pattern == "*" || pattern == name || pattern.split('|').any(|p| p.trim() == name)
            }
            (Some(_), None) => false,
        }
    }

    /// Create a hook from a closure
    pub fn callback<F, Fut>(f: F) -> Arc<dyn Hook>
    where
        F: Fn(HookInput) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<HookOutput>> + Send + 'static,
    {
        Arc::new(FnHook(move |input| {
            Box::pin(f(input)) as crate::types::hooks::HookFuture
        }))
    }
}

/// One hook invocation, before it is attached to a session record
#[derive(Debug, Clone)]
pub struct HookInvocation {
    /// Hook label
    pub hook_name: String,
    /// Event
    pub event: HookEvent,
    /// Correlation id
    pub correlation_id: Option<String>,
    /// Payload the hook saw
    pub input: serde_json::Value,
    /// What it returned
    pub output: Option<serde_json::Value>,
    /// Error or timeout
    pub error: Option<String>,
    /// Whether execution continued after it
    pub continued: bool,
    /// Wall time
    pub duration_ms: u64,
    /// When it ran
    pub executed_at: chrono::DateTime<Utc>,
}

/// Aggregate result of running the hooks for one event
#[derive(Debug, Clone)]
pub struct HookRunOutcome {
    /// Whether execution may proceed
    pub continue_execution: bool,
    /// Reason given by the hook that stopped execution
    pub stop_reason: Option<String>,
    /// Last replacement output produced by a hook
    pub output: Option<serde_json::Value>,
    /// One entry per hook that ran
    pub invocations: Vec<HookInvocation>,
}

impl HookRunOutcome {
    fn empty() -> Self {
        Self {
            continue_execution: true,
            stop_reason: None,
            output: None,
            invocations: Vec::new(),
        }
    }
}

/// Runs registered hooks with timeouts and a failure policy
#[derive(Clone, Debug)]
pub struct HookPipeline {
    registry: HookRegistry,
    timeout: Duration,
    failure_policy: HookFailurePolicy,
}

impl HookPipeline {
    /// Create a pipeline
    #[must_use]
    pub const fn new(
        registry: HookRegistry,
        timeout: Duration,
        failure_policy: HookFailurePolicy,
    ) -> Self {
        Self {
            registry,
            timeout,
            failure_policy,
        }
    }

    /// Registered hooks
    #[must_use]
    pub const fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    /// Run every matching hook for `input.event`
    ///
    /// Hooks see the payload as modified by earlier hooks. A hook that errors,
    /// panics or times out is recorded and then treated according to the
    /// failure policy.
    pub async fn run(&self, input: HookInput) -> HookRunOutcome {
        let tool_name = input.context.tool_name.as_ref().map(|t| t.as_str().to_string());
        let mut outcome = HookRunOutcome::empty();
        let mut payload = input.payload.clone();

        for descriptor in self.registry.matching(input.event, tool_name.as_deref()) {
            let seen = payload.clone();
            let hook_input = HookInput {
                payload: seen.clone(),
                ..input.clone()
            };
            let started = Instant::now();
            let executed_at = Utc::now();
            let result = self.invoke_bounded(descriptor, hook_input).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let (continued, output, error, stop_reason) = match result {
                Ok(out) => {
                    let serialized = serde_json::to_value(&out).ok();
                    if let Some(ref replacement) = out.output {
                        payload = replacement.clone();
                        outcome.output = Some(replacement.clone());
                    }
                    (out.continue_execution, serialized, None, out.stop_reason)
                }
                Err(e) => {
                    log::warn!(
                        "Hook '{}' failed on {:?}: {}",
                        descriptor.name,
                        input.event,
                        e
                    );
                    let blocking = self.failure_policy == HookFailurePolicy::Block;
                    let reason = blocking.then(|| format!("hook '{}' failed: {e}", descriptor.name));
                    (!blocking, None, Some(e.to_string()), reason)
                }
            };

            outcome.invocations.push(HookInvocation {
                hook_name: descriptor.name.clone(),
                event: input.event,
                correlation_id: input.correlation_id.clone(),
                input: seen,
                output,
                error,
                continued,
                duration_ms,
                executed_at,
            });

            if !continued {
                outcome.continue_execution = false;
                outcome.stop_reason = Some(
                    stop_reason.unwrap_or_else(|| format!("blocked by hook '{}'", descriptor.name)),
                );
                break;
            }
        }

        outcome
    }

    async fn invoke_bounded(
        &self,
        descriptor: &HookDescriptor,
        input: HookInput,
    ) -> Result<HookOutput> {
        let call = AssertUnwindSafe(descriptor.hook.invoke(input)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => Err(EngineError::hook(format!(
                "hook '{}' panicked",
                descriptor.name
            ))),
            Err(_) => Err(EngineError::hook(format!(
                "hook '{}' timed out after {}ms",
                descriptor.name,
                self.timeout.as_millis()
            ))),
        }
    }
}
