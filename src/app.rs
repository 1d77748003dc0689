use crate::camera::Camera;
use crate::config::Config;
use crate::coordinator::CaptionDispatcher;
use crate::cv_utils;
use crate::inference::InferenceClient;

use anyhow::Context;
use opencv::highgui;
use std::sync::Arc;

const KEY_QUIT: i32 = 'q' as i32;
const KEY_ESC: i32 = 27;

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let client = match InferenceClient::new(&config.inference) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!("Failed to initialize inference client: {:?}", e);
            return Err(e.into());
        }
    };

    let mut camera = match Camera::open(config.camera.index) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(e.into());
        }
    };

    let dispatcher = CaptionDispatcher::new(client, &config);

    tracing::info!(
        camera_index = config.camera.index,
        url = %config.inference.url,
        model = %config.inference.model,
        every_n_frames = config.dispatch.every_n_frames,
        "starting capture loop"
    );

    // The capture/render loop is blocking opencv work; keep it off the async
    // executor threads. Spawned request tasks still run on the runtime.
    tokio::task::block_in_place(|| run_loop(&mut camera, &dispatcher, &config))?;

    tracing::info!("capture loop stopped");
    Ok(())
}

fn run_loop(
    camera: &mut Camera,
    dispatcher: &CaptionDispatcher,
    config: &Config,
) -> anyhow::Result<()> {
    let window = config.display.window_name.as_str();
    highgui::named_window(window, highgui::WINDOW_AUTOSIZE).context("failed to create window")?;

    let coordinator = dispatcher.coordinator();
    let mut frame_index: u64 = 0;

    loop {
        let Some(mut frame) = camera.read_frame().context("failed to read frame")? else {
            tracing::warn!(frame_index, "camera yielded an empty frame, stopping");
            break;
        };

        dispatcher.maybe_dispatch(&frame, frame_index);

        let caption = coordinator.caption();
        if !caption.is_empty() {
            if let Err(e) = cv_utils::draw_caption(&mut frame, &caption, &config.overlay) {
                tracing::warn!(error = %e, "failed to draw caption overlay");
            }
        }

        highgui::imshow(window, &frame).context("failed to display frame")?;

        let key = highgui::wait_key(1).context("failed to poll keyboard")?;
        if key == KEY_QUIT || key == KEY_ESC {
            tracing::info!("quit requested");
            break;
        }

        frame_index += 1;
    }

    // Any in-flight request is simply abandoned; it has no side effect beyond
    // a caption write nobody will read.
    camera.release().context("failed to release camera")?;
    highgui::destroy_all_windows().context("failed to close window")?;
    Ok(())
}
