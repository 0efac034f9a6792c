mod entity;
mod repository;
mod template;

pub use entity::{CommandDef, Device, DeviceKind, PayloadFormat};
pub use repository::DeviceRepository;
pub use template::render_payload_template;
