use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use editor_shell::config::EditorConfig;
use editor_shell::image_ref::Candidate;
use editor_shell::tasks::loader::FsImageFetcher;
use editor_shell::{EditorController, MountOptions};

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

async fn mount_idle(config: EditorConfig) -> EditorController {
    let controller = EditorController::mount(config, MountOptions::new(Arc::new(FsImageFetcher)));
    tokio::time::timeout(Duration::from_secs(5), controller.wait_idle())
        .await
        .expect("editor never went idle");
    controller
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loads_png_from_disk_and_names_it_after_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sunset.png");
    std::fs::write(&path, png_bytes(6, 3)).unwrap();

    let controller = mount_idle(EditorConfig {
        source: Some(Candidate::from(path.display().to_string())),
        ..EditorConfig::default()
    })
    .await;

    let data = controller.current_image_data().expect("image committed");
    assert_eq!(data.image_data.full_name, "sunset.png");
    assert_eq!((data.image_data.width, data.image_data.height), (6, 3));
    assert_eq!(data.image.bitmap().map(|b| b.pixels.len()), Some(6 * 3 * 4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn data_urls_use_the_default_name() {
    let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(2, 5));
    let controller = mount_idle(EditorConfig {
        source: Some(Candidate::from(format!("data:image/png;base64,{encoded}"))),
        default_saved_image_name: "upload".to_string(),
        default_saved_image_type: "jpeg".to_string(),
        ..EditorConfig::default()
    })
    .await;

    let data = controller.current_image_data().expect("image committed");
    assert_eq!(data.image_data.full_name, "upload.jpeg");
    assert_eq!(data.image_data.mime_type, "image/jpeg");
    assert_eq!((data.image_data.width, data.image_data.height), (2, 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_files_surface_as_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.png");
    std::fs::write(&path, b"definitely not a png").unwrap();

    let controller = mount_idle(EditorConfig {
        source: Some(Candidate::from(path.display().to_string())),
        ..EditorConfig::default()
    })
    .await;

    let state = controller.state();
    assert!(state.original_image.is_none());
    assert!(state.feedback.is_some_and(|f| f.is_persistent()));
    assert!(controller.current_image_data().is_none());
}
