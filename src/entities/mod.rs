pub mod notification_error;
pub mod order;
pub mod order_counter;
pub mod product;
pub mod scheduled_reminder;
pub mod special_code;
