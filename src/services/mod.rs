//! Service layer: business logic over the storage port.

pub mod agent_service;
pub mod project_service;
pub mod session_service;
pub mod task_service;
pub mod task_type_service;
pub mod template;

pub use agent_service::AgentService;
pub use project_service::ProjectService;
pub use session_service::{SessionContext, SessionHandle, SessionService, TokenSigner};
pub use task_service::TaskService;
pub use task_type_service::TaskTypeService;
