mod settings;

pub use settings::{ChannelSettings, NotifierSettings, QueueSettings, Settings};
