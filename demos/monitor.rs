use notify_mux::{Config, Event, EventMask, Multiplexer};
use std::path::Path;

/// Prints creations, deletions and finished writes in a directory
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "/tmp".to_owned());

    log::info!("Watching {path}");

    if let Err(error) = watch(path) {
        log::error!("Error: {error:?}");
    }
}

fn watch<P: AsRef<Path>>(path: P) -> notify_mux::Result<()> {
    let mut mux = Multiplexer::new(Config::default())?;

    mux.subscribe(
        path.as_ref(),
        EventMask::CREATE | EventMask::DELETE | EventMask::CLOSE_WRITE,
        |path: &Path, event: &Event, _: &()| {
            let name = event
                .name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "null".to_owned());
            println!("[{:#010x}]: {} // {name}", event.mask().bits(), path.display());
        },
        (),
    )?;

    // run the loop on this thread, it only returns if the channel fails
    let exit = mux.dispatcher().run()?;
    log::info!("dispatch loop ended: {exit:?}");

    mux.close()?;
    Ok(())
}
