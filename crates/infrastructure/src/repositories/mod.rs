pub mod device_repository;
pub mod rule_repository;

pub use device_repository::FileDeviceRepository;
pub use rule_repository::FileRuleRepository;
