//! Interactive picking demo.
//!
//! Left click (or `P` over an object) selects it; `S` writes the picking
//! buffer to `selection_buffer.ppm`. Pass a strategy name as the first
//! argument: immediate, client-array, vertex-buffer or vao. Add `--mrt` to
//! render display and ID images in one pass.

use pickview::prelude::*;

fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());

    let mut scene = SceneConfig::default();
    for arg in std::env::args().skip(1) {
        if arg == "--mrt" {
            scene = scene.with_multi_target(true);
        } else {
            let strategy: RenderStrategy = arg.parse()?;
            scene = scene.with_strategy(strategy);
        }
    }

    let config = AppConfig::default()
        .with_title("Pickview - scene picking")
        .with_scene(scene);
    PickviewApp::new(config)?.run()
}
