use crate::error::{Error, RasterKind};
use crate::events::{HostEvent, LoadId, LoadRequest, PreparedImageCpu, PreparedScene, SceneLoaded};
use crate::processing::depth_field::DepthRaster;
use crate::processing::layout;
use crate::processing::mesh::DisplacementMesh;
use anyhow::Result;
use fast_image_resize as fir;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Decodes an image to RGBA8 and applies EXIF orientation if available.
// Missing or unreadable metadata leaves the decoded orientation as is.
fn decode_rgba8_apply_exif(path: &Path) -> Result<image::RgbaImage, image::ImageError> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    let mut img = img.to_rgba8();

    let orientation: u16 = read_orientation(path).unwrap_or(1);
    match orientation {
        1 => {}
        2 => img = image::imageops::flip_horizontal(&img),
        3 => img = image::imageops::rotate180(&img),
        4 => img = image::imageops::flip_vertical(&img),
        5 => {
            // transpose
            img = image::imageops::rotate90(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        6 => img = image::imageops::rotate90(&img),
        7 => {
            // transverse
            img = image::imageops::rotate270(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        8 => img = image::imageops::rotate270(&img),
        _ => {}
    }

    Ok(img)
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!("exif orientation {} for {}", o, path.display());
    Some(o)
}

fn decode_raster(kind: RasterKind, path: &Path) -> Result<image::RgbaImage, Error> {
    let img = decode_rgba8_apply_exif(path).map_err(|source| Error::LoadFailure {
        kind,
        path: path.to_path_buf(),
        source,
    })?;
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::EmptyRaster {
            kind,
            path: path.to_path_buf(),
        });
    }
    Ok(img)
}

fn resize_rgba(
    source: &image::RgbaImage,
    target_w: u32,
    target_h: u32,
) -> Result<image::RgbaImage, String> {
    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| err.to_string())?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| err.to_string())?;
    image::RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| "resized buffer has the wrong length".to_string())
}

// The colour raster becomes a GPU texture and must fit the device limit.
fn fit_texture_limit(
    img: image::RgbaImage,
    path: &Path,
    max_dim: u32,
) -> Result<image::RgbaImage, Error> {
    let (w, h) = img.dimensions();
    let (tw, th) = layout::fit_within(w, h, max_dim);
    if (tw, th) == (w, h) {
        return Ok(img);
    }
    info!(
        width = w,
        height = h,
        target_w = tw,
        target_h = th,
        path = %path.display(),
        "downscaling image to the texture limit"
    );
    resize_rgba(&img, tw, th).map_err(|reason| Error::Downscale {
        kind: RasterKind::Image,
        path: path.to_path_buf(),
        reason,
    })
}

/// Decodes both rasters, dilates the depth map and builds the mesh. Runs on
/// a blocking thread.
pub fn prepare_scene(req: &LoadRequest) -> Result<PreparedScene, Error> {
    let image = decode_raster(RasterKind::Image, &req.image)?;
    let image = fit_texture_limit(image, &req.image, req.max_texture_dim)?;
    let depth = decode_raster(RasterKind::DepthMap, &req.depth_map)?;

    let mut raster = DepthRaster::from_rgba(&depth);
    if req.expand_radius > 0 {
        raster.dilate(req.expand_radius);
    }
    let mesh = DisplacementMesh::build(&raster, req.mesh_resolution, req.mesh_depth);
    debug!(
        id = req.id,
        cols = mesh.cols(),
        rows = mesh.rows(),
        "mesh built"
    );

    let (width, height) = image.dimensions();
    Ok(PreparedScene {
        image: PreparedImageCpu {
            path: req.image.clone(),
            width,
            height,
            pixels: image.into_raw(),
        },
        depth_path: req.depth_map.clone(),
        mesh: Arc::new(mesh),
    })
}

/// Prepares scenes off the render thread.
///
/// Only the newest request's result is forwarded; older ones still finish
/// on their blocking threads but are discarded.
pub async fn run(
    mut load_rx: Receiver<LoadRequest>,
    to_viewer: Sender<SceneLoaded>,
    to_host: Sender<HostEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut tasks: JoinSet<(LoadId, Result<PreparedScene, Error>)> = JoinSet::new();
    let mut latest: Option<LoadId> = None;

    loop {
        select! {
            _ = cancel.cancelled() => break,

            Some(req) = load_rx.recv() => {
                if !tasks.is_empty() {
                    debug!(in_flight = tasks.len(), "newer load supersedes in-flight work");
                }
                latest = Some(req.id);
                tasks.spawn_blocking(move || (req.id, prepare_scene(&req)));
            }

            Some(join_res) = tasks.join_next() => {
                let (id, res) = match join_res {
                    Ok(done) => done,
                    Err(err) => {
                        warn!(error = %err, "scene preparation task failed");
                        continue;
                    }
                };
                if latest != Some(id) {
                    debug!(id, "discarding superseded scene");
                    continue;
                }
                match res {
                    Ok(scene) => {
                        info!(id, image = %scene.image.path.display(), "scene ready");
                        if to_viewer.send(SceneLoaded { id, scene: Arc::new(scene) }).await.is_err() {
                            debug!("viewer channel closed; stopping loader");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(id, error = %err, "scene load failed");
                        let message = format!("{:#}", anyhow::Error::from(err));
                        if to_host.send(HostEvent::LoadFailed { id, message }).await.is_err() {
                            debug!("host channel closed; stopping loader");
                            break;
                        }
                    }
                }
            }

            else => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, value: u8) -> PathBuf {
        let path = dir.join(name);
        image::RgbaImage::from_pixel(w, h, image::Rgba([value, value, value, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn request(id: LoadId, image: PathBuf, depth_map: PathBuf) -> LoadRequest {
        LoadRequest {
            id,
            image,
            depth_map,
            expand_radius: 2,
            mesh_resolution: 16,
            mesh_depth: 1.0,
            max_texture_dim: 8192,
        }
    }

    #[test]
    fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orient6.jpg");
        std::fs::write(&path, &bytes).unwrap();
        let img = decode_rgba8_apply_exif(&path).unwrap();
        assert_eq!(img.dimensions(), (1, 2));
    }

    #[test]
    fn prepares_scene_from_pair() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_png(dir.path(), "photo.png", 40, 20, 90);
        let depth = write_png(dir.path(), "depth.png", 40, 20, 200);
        let scene = prepare_scene(&request(1, image.clone(), depth)).unwrap();
        assert_eq!((scene.image.width, scene.image.height), (40, 20));
        assert_eq!(scene.image.pixels.len(), 40 * 20 * 4);
        assert_eq!(scene.image.path, image);
        assert!((scene.mesh.plane_aspect() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn oversized_image_fits_texture_limit() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_png(dir.path(), "wide.png", 300, 4, 90);
        let depth = write_png(dir.path(), "depth.png", 300, 4, 200);
        let mut req = request(1, image, depth);
        req.max_texture_dim = 256;
        let scene = prepare_scene(&req).unwrap();
        assert_eq!((scene.image.width, scene.image.height), (256, 3));
        assert_eq!(scene.image.pixels.len(), 256 * 3 * 4);
        // the mesh keeps the depth map's aspect
        assert!((scene.mesh.plane_aspect() - 75.0).abs() < 1e-3);
    }

    #[test]
    fn missing_depth_map_names_the_raster() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_png(dir.path(), "photo.png", 4, 4, 0);
        let err = prepare_scene(&request(1, image, dir.path().join("nope.png"))).unwrap_err();
        match err {
            Error::LoadFailure { kind, .. } => assert_eq!(kind, RasterKind::DepthMap),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwards_scene_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_png(dir.path(), "photo.png", 8, 8, 10);
        let depth = write_png(dir.path(), "depth.png", 8, 8, 128);

        let (load_tx, load_rx) = mpsc::channel(4);
        let (viewer_tx, mut viewer_rx) = mpsc::channel(4);
        let (host_tx, mut host_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(load_rx, viewer_tx, host_tx, cancel.clone()));

        load_tx.send(request(1, image.clone(), depth)).await.unwrap();
        let loaded = viewer_rx.recv().await.unwrap();
        assert_eq!(loaded.id, 1);

        load_tx
            .send(request(2, image, dir.path().join("missing.png")))
            .await
            .unwrap();
        match host_rx.recv().await.unwrap() {
            HostEvent::LoadFailed { id, message } => {
                assert_eq!(id, 2);
                assert!(message.contains("depth map"));
            }
            other => panic!("unexpected {other:?}"),
        }

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stops_when_viewer_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_png(dir.path(), "photo.png", 8, 8, 10);
        let depth = write_png(dir.path(), "depth.png", 8, 8, 128);

        let (load_tx, load_rx) = mpsc::channel(4);
        let (viewer_tx, viewer_rx) = mpsc::channel(4);
        let (host_tx, _host_rx) = mpsc::channel(4);
        drop(viewer_rx);
        let task = tokio::spawn(run(load_rx, viewer_tx, host_tx, CancellationToken::new()));

        load_tx.send(request(1, image, depth)).await.unwrap();
        task.await.unwrap().unwrap();
        assert!(load_tx.is_closed());
    }
}
