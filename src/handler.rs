//! Command handlers and the ordered handler registry
//!
//! A handler pairs a sample [`MotionCommand`] (what it matches) with a
//! translation into a wire [`Command`]. Vendors supply their handlers
//! through a [`CommandSet`]; the [`CommandRegister`] keeps them in
//! registration order and hands out the first match.

use crate::{
    command::Command,
    error::{Result, RmiError},
    message::MotionCommand,
};
use std::fmt::Write as _;
use tracing::debug;

/// Matcher and translator for one abstract command shape
pub trait CommandHandler: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Sample command describing which fields this handler cares about
    fn sample(&self) -> &MotionCommand;

    /// Translate an abstract command into a wire command
    ///
    /// Must not touch shared state. Malformed input is a
    /// [`RmiError::Translation`].
    fn process(&self, msg: &MotionCommand) -> Result<Command>;

    fn matches(&self, msg: &MotionCommand) -> bool {
        self.sample().matches_sample(msg)
    }

    /// Human readable list of the fields this handler matches on
    fn criteria(&self) -> String {
        let sample = self.sample();
        let mut out = format!("CommandHandler {} criteria:", self.name());
        for (field, value) in [
            ("command_type", &sample.command_type),
            ("pose_reference", &sample.pose_reference),
            ("pose_type", &sample.pose_type),
            ("velocity_type", &sample.velocity_type),
        ] {
            if !value.is_empty() {
                let _ = write!(out, " {}={}", field, value);
            }
        }
        if !sample.pose.is_empty() {
            let _ = write!(out, " pose(size)={}", sample.pose.len());
        }
        out
    }
}

type ProcessFn = dyn Fn(&MotionCommand) -> Result<Command> + Send + Sync;

/// Handler backed by a closure, for one-off commands
pub struct FnHandler {
    name: String,
    sample: MotionCommand,
    process: Box<ProcessFn>,
}

impl FnHandler {
    pub fn new<F>(name: &str, sample: MotionCommand, process: F) -> Self
    where
        F: Fn(&MotionCommand) -> Result<Command> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            sample,
            process: Box::new(process),
        }
    }
}

impl CommandHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&self) -> &MotionCommand {
        &self.sample
    }

    fn process(&self, msg: &MotionCommand) -> Result<Command> {
        (self.process)(msg)
    }
}

/// A vendor's collection of handlers
pub trait CommandSet: Send + Sync {
    fn name(&self) -> &str;

    /// Build the handlers in priority order for a robot with these joints
    fn handlers(&self, joint_names: &[String]) -> Vec<Box<dyn CommandHandler>>;
}

/// Ordered registry of handlers, first match wins
pub struct CommandRegister {
    command_set: Box<dyn CommandSet>,
    handlers: Vec<Box<dyn CommandHandler>>,
    registered: bool,
}

impl CommandRegister {
    pub fn new(command_set: Box<dyn CommandSet>) -> Self {
        Self {
            command_set,
            handlers: Vec::new(),
            registered: false,
        }
    }

    /// Register the command set's handlers; does nothing the second time
    pub fn initialize(&mut self, joint_names: &[String]) {
        if self.registered {
            return;
        }

        let handlers = self.command_set.handlers(joint_names);
        for handler in handlers {
            debug!("{}", handler.criteria());
            self.handlers.push(handler);
        }
        self.registered = true;
        debug!(
            "Registered {} handlers from command set '{}'",
            self.handlers.len(),
            self.command_set.name()
        );
    }

    /// Append an extra handler after the ones already registered
    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    /// First handler whose sample matches `msg`
    pub fn find_handler(&self, msg: &MotionCommand) -> Option<&dyn CommandHandler> {
        self.handlers
            .iter()
            .find(|h| h.matches(msg))
            .map(|h| &**h)
    }

    /// Find a handler and translate `msg` with it
    pub fn translate(&self, msg: &MotionCommand) -> Result<Command> {
        let handler = self.find_handler(msg).ok_or_else(|| {
            RmiError::NoHandler(format!(
                "command_type={:?} pose_type={:?} pose(size)={}",
                msg.command_type,
                msg.pose_type,
                msg.pose.len()
            ))
        })?;
        handler.process(msg)
    }

    pub fn handlers(&self) -> impl Iterator<Item = &dyn CommandHandler> {
        self.handlers.iter().map(|h| &**h)
    }

    pub fn command_set_name(&self) -> &str {
        self.command_set.name()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;

    struct TwoPtp;

    impl CommandSet for TwoPtp {
        fn name(&self) -> &str {
            "two-ptp"
        }

        fn handlers(&self, _joint_names: &[String]) -> Vec<Box<dyn CommandHandler>> {
            vec![
                Box::new(FnHandler::new("first", MotionCommand::new("PTP"), |_| {
                    Ok(Command::new(CommandKind::Action, "first"))
                })),
                Box::new(FnHandler::new(
                    "second",
                    MotionCommand::new("PTP").with_pose("JOINTS", vec![0.0; 6]),
                    |_| Ok(Command::new(CommandKind::Action, "second")),
                )),
            ]
        }
    }

    #[test]
    fn test_first_registered_match_wins() {
        let mut register = CommandRegister::new(Box::new(TwoPtp));
        register.initialize(&[]);

        let msg = MotionCommand::new("PTP").with_pose("JOINTS", vec![1.0; 6]);
        let handler = register.find_handler(&msg).unwrap();
        assert_eq!(handler.name(), "first");
        assert_eq!(register.translate(&msg).unwrap().name(), "first");
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut register = CommandRegister::new(Box::new(TwoPtp));
        assert!(register.is_empty());
        register.initialize(&[]);
        register.initialize(&[]);
        assert!(register.is_registered());
        assert_eq!(register.len(), 2);
    }

    #[test]
    fn test_no_handler_is_an_error() {
        let mut register = CommandRegister::new(Box::new(TwoPtp));
        register.initialize(&[]);

        let msg = MotionCommand::new("LIN");
        assert!(register.find_handler(&msg).is_none());
        assert!(matches!(register.translate(&msg), Err(RmiError::NoHandler(_))));
    }

    #[test]
    fn test_registered_extra_handler_runs_last() {
        let mut register = CommandRegister::new(Box::new(TwoPtp));
        register.initialize(&[]);
        register.register(Box::new(FnHandler::new("any", MotionCommand::default(), |m| {
            Ok(Command::new(CommandKind::Action, m.command_type.to_lowercase()))
        })));

        assert_eq!(register.translate(&MotionCommand::new("PTP")).unwrap().name(), "first");
        assert_eq!(register.translate(&MotionCommand::new("WAIT")).unwrap().name(), "wait");
    }

    #[test]
    fn test_criteria_lists_used_fields() {
        let handler = FnHandler::new(
            "ptp",
            MotionCommand::new("PTP").with_pose("JOINTS", vec![0.0; 7]),
            |_| Ok(Command::new(CommandKind::Action, "x")),
        );
        let criteria = handler.criteria();
        assert!(criteria.contains("command_type=PTP"));
        assert!(criteria.contains("pose(size)=7"));
        assert!(!criteria.contains("velocity_type"));
    }
}
