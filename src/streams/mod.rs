mod live;
mod replay;

pub use live::run_event_loop;
pub use replay::spawn_bar_replay;
