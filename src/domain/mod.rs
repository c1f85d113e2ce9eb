mod subscriber_email;
mod subscriber_name;
// allow external `use` statements to skip `subscriber_email` etc
pub use subscriber_email::SubscriberEmail;
pub use subscriber_name::SubscriberName;
