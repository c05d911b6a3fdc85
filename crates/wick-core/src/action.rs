use serde_json::Value;

use crate::session::{Args, CallResult, Kwargs, Options, Session};
use crate::value::{self, Arg};
use crate::Result;

/// One unit of work scheduled by the call and publish orchestrators.
///
/// Built once per command and shared, read-only, by every iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Call {
        procedure: String,
        args: Args,
        kwargs: Kwargs,
        options: Options,
    },
    Publish {
        topic: String,
        args: Args,
        kwargs: Kwargs,
        options: Options,
    },
}

impl Action {
    pub fn call(procedure: impl Into<String>) -> Self {
        Action::Call {
            procedure: procedure.into(),
            args: Args::new(),
            kwargs: Kwargs::new(),
            options: Options::new(),
        }
    }

    pub fn publish(topic: impl Into<String>) -> Self {
        Action::Publish {
            topic: topic.into(),
            args: Args::new(),
            kwargs: Kwargs::new(),
            options: Options::new(),
        }
    }

    /// Replace the positional arguments with coerced values.
    pub fn with_args(mut self, new_args: Vec<Arg>) -> Self {
        match &mut self {
            Action::Call { args, .. } | Action::Publish { args, .. } => {
                *args = value::to_list(new_args);
            }
        }
        self
    }

    pub fn with_kwargs(mut self, new_kwargs: Kwargs) -> Self {
        match &mut self {
            Action::Call { kwargs, .. } | Action::Publish { kwargs, .. } => *kwargs = new_kwargs,
        }
        self
    }

    pub fn with_options(mut self, new_options: Options) -> Self {
        match &mut self {
            Action::Call { options, .. } | Action::Publish { options, .. } => {
                *options = new_options
            }
        }
        self
    }

    pub fn with_option(mut self, key: &str, v: Value) -> Self {
        match &mut self {
            Action::Call { options, .. } | Action::Publish { options, .. } => {
                options.insert(key.to_string(), v);
            }
        }
        self
    }

    /// The procedure or topic this action targets.
    pub fn target(&self) -> &str {
        match self {
            Action::Call { procedure, .. } => procedure,
            Action::Publish { topic, .. } => topic,
        }
    }

    /// Perform the action once. Calls yield their result; publishes yield
    /// `None`.
    pub async fn execute(&self, session: &dyn Session) -> Result<Option<CallResult>> {
        match self {
            Action::Call {
                procedure,
                args,
                kwargs,
                options,
            } => session
                .call(procedure, args.clone(), kwargs.clone(), options.clone())
                .await
                .map(Some),
            Action::Publish {
                topic,
                args,
                kwargs,
                options,
            } => session
                .publish(topic, args.clone(), kwargs.clone(), options.clone())
                .await
                .map(|_| None),
        }
    }
}
