//! Command 层：RobotCommand trait、注册表、网关与标准 Command

pub mod gateway;
pub mod registry;
pub mod standard;

pub use gateway::CommandGateway;
pub use registry::{ArgumentSpec, CommandDescriptor, CommandOutput, CommandRegistry, RobotCommand};
pub use standard::{
    standard_registry, AskQuestionCommand, DropObjectCommand, ErrorCommand, FindCommand,
    IntroduceSelfCommand, MoveCommand, PickUpObjectCommand, SpeakMessageCommand,
};
