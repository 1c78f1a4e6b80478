use crate::models::{Derivative, DerivativeSet};
use crate::services::config_service::Settings;
use crate::services::image_policy::{
    self, SizeSpec, DOMINANT_COLOR_BOUND, FILE_SIZES, SOURCE_PREFERENCE, TINY, TINY_BLUR_SIGMA,
    WEBP_METHOD,
};
use crate::utils::{AppError, Result};
use crate::{log_debug, log_error, log_info, log_timing, log_warn};
use base64::Engine;
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task;

/// A derivative file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub file_name: String,
    pub version: i64,
}

/// Generates, copies, regenerates and deletes the image derivatives of menu
/// entities. Files live under `{upload_root}/{id}/` and are named
/// `{derivative}_{version}.{webp|avif}`.
#[derive(Debug, Clone)]
pub struct ImageService {
    upload_root: PathBuf,
    url_prefix: String,
    avif_enabled: bool,
    avif_encoder: AvifEncodeFn,
}

/// Encoder used for the AVIF copies.
pub type AvifEncodeFn = fn(&DynamicImage, u8) -> Result<Vec<u8>>;

impl ImageService {
    pub fn new(upload_root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            upload_root: upload_root.into(),
            url_prefix: url_prefix.into(),
            avif_enabled: image_policy::avif_compiled_in(),
            avif_encoder: encode_avif,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.upload_dir, &settings.upload_url_prefix).with_avif(settings.avif_enabled)
    }

    /// AVIF stays off when the `avif` feature is not compiled in.
    pub fn with_avif(mut self, enabled: bool) -> Self {
        self.avif_enabled = enabled && image_policy::avif_compiled_in();
        self
    }

    /// Swap the AVIF encoder; enables AVIF output regardless of features.
    #[cfg(test)]
    pub(crate) fn with_avif_encoder(mut self, encoder: AvifEncodeFn) -> Self {
        self.avif_enabled = true;
        self.avif_encoder = encoder;
        self
    }

    pub fn avif_enabled(&self) -> bool {
        self.avif_enabled
    }

    pub fn entity_dir(&self, id: i64) -> PathBuf {
        self.upload_root.join(id.to_string())
    }

    /// URL under which a derivative file is served.
    pub fn public_path(&self, id: i64, file_name: &str) -> String {
        format!("{}/{}/{}", self.url_prefix.trim_end_matches('/'), id, file_name)
    }

    /// Decode an upload and write the full derivative set for entity `id`.
    ///
    /// # Returns
    /// * `Result<DerivativeSet>` - paths of the written files plus the inline
    ///   placeholder and dominant colour; `AppError::ImageDecode` when the
    ///   bytes are not a raster image
    pub async fn generate(&self, bytes: &[u8], id: i64) -> Result<DerivativeSet> {
        log_info!(
            operation = "generate_derivatives",
            entity_id = id,
            input_bytes = bytes.len(),
            avif = self.avif_enabled,
            "Starting derivative generation"
        );

        let service = self.clone();
        let bytes = bytes.to_vec();
        let result = task::spawn_blocking(move || {
            log_timing!({ service.generate_sync(&bytes, id) }, "generate_derivatives")
        })
        .await
        .map_err(|e| AppError::ImageProcessing(format!("Task join error: {}", e)))?;

        match &result {
            Ok(set) => {
                log_info!(
                    operation = "generate_derivatives",
                    entity_id = id,
                    derivative_count = set.len(),
                    success = true,
                    "Derivative generation completed"
                );
            }
            Err(e) => {
                log_error!(
                    operation = "generate_derivatives",
                    entity_id = id,
                    error = %e,
                    success = false,
                    "Derivative generation failed"
                );
            }
        }
        result
    }

    /// Remove every derivative of `id` and its directory. No-op when absent.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let dir = self.entity_dir(id);
        task::spawn_blocking(move || delete_dir(&dir))
            .await
            .map_err(|e| AppError::ImageProcessing(format!("Task join error: {}", e)))?
    }

    /// Duplicate the newest file of each derivative from `source` to `target`
    /// under a fresh version stamp, then recompute the placeholder and colour
    /// from the copied large file. Returns an empty set when `source` has no
    /// files.
    pub async fn copy(&self, source: i64, target: i64) -> Result<DerivativeSet> {
        let service = self.clone();
        task::spawn_blocking(move || service.copy_sync(source, target))
            .await
            .map_err(|e| AppError::ImageProcessing(format!("Task join error: {}", e)))?
    }

    /// Backfill placeholder, colour and AVIF copies from the files already on
    /// disk, keeping each file's version stamp. `None` when neither a large
    /// nor a medium file exists.
    pub async fn regenerate(&self, id: i64) -> Result<Option<DerivativeSet>> {
        let service = self.clone();
        task::spawn_blocking(move || service.regenerate_sync(id))
            .await
            .map_err(|e| AppError::ImageProcessing(format!("Task join error: {}", e)))?
    }

    /// Newest file per derivative for `id`.
    pub fn existing_versions(&self, id: i64) -> Result<BTreeMap<Derivative, StoredFile>> {
        let dir = self.entity_dir(id);
        let mut newest: BTreeMap<Derivative, StoredFile> = BTreeMap::new();
        if !dir.exists() {
            return Ok(newest);
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some((derivative, version)) = parse_file_name(&file_name) else {
                continue;
            };
            let replace = newest
                .get(&derivative)
                .map(|current| version > current.version)
                .unwrap_or(true);
            if replace {
                newest.insert(
                    derivative,
                    StoredFile {
                        path: entry.path(),
                        file_name,
                        version,
                    },
                );
            }
        }
        Ok(newest)
    }

    fn generate_sync(&self, bytes: &[u8], id: i64) -> Result<DerivativeSet> {
        let img = flatten_to_rgb(decode(bytes)?);
        let (width, height) = img.dimensions();
        log_debug!(width = width, height = height, "Decoded upload");

        let dir = self.entity_dir(id);
        ensure_dir(&dir)?;
        let version = version_stamp();

        let mut set = DerivativeSet::new();
        set.insert(Derivative::TinyBase64, tiny_placeholder(&img)?);
        set.insert(Derivative::DominantColor, dominant_color(&img));

        for spec in FILE_SIZES.iter() {
            let resized = fit_within(&img, spec.bound);
            let data = encode_webp(&resized, spec.quality)?;
            let name = file_name(spec.derivative, version);
            write_file(&dir.join(&name), &data)?;
            log_debug!(
                derivative = %spec.derivative,
                width = resized.width(),
                height = resized.height(),
                bytes = data.len(),
                "Wrote derivative"
            );
            set.insert(spec.derivative, self.public_path(id, &name));

            if let Some(path) = self.write_avif(&resized, spec, id, version)? {
                if let Some(avif) = spec.derivative.avif_counterpart() {
                    set.insert(avif, path);
                }
            }
        }

        Ok(set)
    }

    /// Encode the AVIF copy of an already resized bitmap. Encoder failures are
    /// logged and skipped; write failures propagate.
    fn write_avif(
        &self,
        resized: &DynamicImage,
        spec: &SizeSpec,
        id: i64,
        version: i64,
    ) -> Result<Option<String>> {
        let (Some(quality), Some(avif)) = (spec.avif_quality, spec.derivative.avif_counterpart())
        else {
            return Ok(None);
        };
        if !self.avif_enabled {
            return Ok(None);
        }

        match (self.avif_encoder)(resized, quality) {
            Ok(data) => {
                let name = file_name(avif, version);
                write_file(&self.entity_dir(id).join(&name), &data)?;
                Ok(Some(self.public_path(id, &name)))
            }
            Err(e) => {
                log_warn!(
                    derivative = %avif,
                    entity_id = id,
                    error = %e,
                    "AVIF encoding failed, WebP copy remains"
                );
                Ok(None)
            }
        }
    }

    fn copy_sync(&self, source: i64, target: i64) -> Result<DerivativeSet> {
        let sources = self.existing_versions(source)?;
        let mut set = DerivativeSet::new();
        if sources.is_empty() {
            log_info!(source = source, target = target, "No images to copy");
            return Ok(set);
        }

        let dir = self.entity_dir(target);
        ensure_dir(&dir)?;
        let version = version_stamp();

        for (derivative, stored) in &sources {
            let name = file_name(*derivative, version);
            fs::copy(&stored.path, dir.join(&name)).map_err(|e| {
                AppError::FileSystem(format!("Failed to copy {}: {}", stored.path.display(), e))
            })?;
            set.insert(*derivative, self.public_path(target, &name));
        }

        if sources.contains_key(&Derivative::Large) {
            let copied = dir.join(file_name(Derivative::Large, version));
            match fs::read(&copied).map_err(AppError::from).and_then(|b| decode(&b)) {
                Ok(img) => {
                    let img = flatten_to_rgb(img);
                    set.insert(Derivative::TinyBase64, tiny_placeholder(&img)?);
                    set.insert(Derivative::DominantColor, dominant_color(&img));
                }
                Err(e) => {
                    log_warn!(
                        file = %copied.display(),
                        error = %e,
                        "Copied large image unreadable, skipping placeholder"
                    );
                }
            }
        }

        log_info!(
            source = source,
            target = target,
            version = version,
            files = sources.len(),
            "Copied derivatives"
        );
        Ok(set)
    }

    fn regenerate_sync(&self, id: i64) -> Result<Option<DerivativeSet>> {
        let existing = self.existing_versions(id)?;
        let Some(source) = SOURCE_PREFERENCE.iter().find_map(|d| existing.get(d)) else {
            log_debug!(entity_id = id, "No source file to regenerate from");
            return Ok(None);
        };

        let img = flatten_to_rgb(decode(&fs::read(&source.path)?)?);
        let mut set = DerivativeSet::new();
        set.insert(Derivative::TinyBase64, tiny_placeholder(&img)?);
        set.insert(Derivative::DominantColor, dominant_color(&img));

        for spec in FILE_SIZES.iter() {
            let (Some(primary), Some(avif)) =
                (existing.get(&spec.derivative), spec.derivative.avif_counterpart())
            else {
                continue;
            };

            let written = if self.avif_enabled {
                let bitmap = flatten_to_rgb(decode(&fs::read(&primary.path)?)?);
                self.write_avif(&bitmap, spec, id, primary.version)?
            } else {
                None
            };

            // Fall back to an AVIF file already sitting next to the WebP one
            let path = written.or_else(|| {
                existing
                    .get(&avif)
                    .filter(|f| f.version == primary.version)
                    .map(|f| self.public_path(id, &f.file_name))
            });
            if let Some(path) = path {
                set.insert(avif, path);
            }
        }

        log_info!(
            entity_id = id,
            source = %source.file_name,
            derivative_count = set.len(),
            "Regenerated derivatives"
        );
        Ok(Some(set))
    }
}

/// Current unix time in seconds, shared by every file of one set.
pub fn version_stamp() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn file_name(derivative: Derivative, version: i64) -> String {
    format!(
        "{}_{}.{}",
        derivative.file_stem(),
        version,
        derivative.extension().unwrap_or("webp")
    )
}

/// Parses `{stem}_{version}.{ext}` back into a derivative and version.
pub fn parse_file_name(name: &str) -> Option<(Derivative, i64)> {
    let (base, ext) = name.rsplit_once('.')?;
    let (stem, version) = base.rsplit_once('_')?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version = version.parse().ok()?;

    let primary = match Derivative::from_key(stem)? {
        d @ (Derivative::Thumbnail | Derivative::Small | Derivative::Medium | Derivative::Large) => d,
        _ => return None,
    };
    match ext {
        "webp" => Some((primary, version)),
        "avif" => primary.avif_counterpart().map(|d| (d, version)),
        _ => None,
    }
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(AppError::ImageDecode("Image data is empty".to_string()));
    }
    image::load_from_memory(bytes)
        .map_err(|e| AppError::ImageDecode(format!("Failed to decode image: {}", e)))
}

/// Flatten transparency onto white and drop to 8-bit RGB.
pub fn flatten_to_rgb(img: DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }

    let rgba = img.to_rgba8();
    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    });
    DynamicImage::ImageRgb8(flattened)
}

/// Aspect-preserving Lanczos downscale so neither edge exceeds `bound`.
/// Smaller images come back unchanged.
pub fn fit_within(img: &DynamicImage, bound: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= bound && height <= bound {
        return img.clone();
    }
    img.resize(bound, bound, FilterType::Lanczos3)
}

/// Blurred 20px preview as a `data:` URI.
pub fn tiny_placeholder(img: &DynamicImage) -> Result<String> {
    let tiny = fit_within(img, TINY.bound).blur(TINY_BLUR_SIGMA);
    let data = encode_webp(&tiny, TINY.quality)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    Ok(format!("data:image/webp;base64,{}", encoded))
}

/// Channel-wise mean over a 50px sample, as `#rrggbb`.
pub fn dominant_color(img: &DynamicImage) -> String {
    let sample = fit_within(img, DOMINANT_COLOR_BOUND).to_rgb8();
    let count = (sample.width() as u64 * sample.height() as u64).max(1);
    let mut sums = [0u64; 3];
    for pixel in sample.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += channel as u64;
        }
    }
    format!(
        "#{:02x}{:02x}{:02x}",
        sums[0] / count,
        sums[1] / count,
        sums[2] / count
    )
}

/// Lossy WebP at `quality` with maximum compression effort.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut config = webp::WebPConfig::new().map_err(|_| {
        AppError::ImageProcessing("Failed to initialise WebP encoder config".to_string())
    })?;
    config.quality = quality as f32;
    config.method = WEBP_METHOD;

    let memory = webp::Encoder::from_rgb(rgb.as_raw(), width, height)
        .encode_advanced(&config)
        .map_err(|e| AppError::ImageProcessing(format!("Failed to encode WebP: {:?}", e)))?;
    Ok(memory.to_vec())
}

#[cfg(feature = "avif")]
pub fn encode_avif(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    use image::codecs::avif::AvifEncoder;

    let mut buffer = Vec::new();
    let encoder =
        AvifEncoder::new_with_speed_quality(&mut buffer, image_policy::AVIF_SPEED, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| AppError::ImageProcessing(format!("Failed to encode AVIF: {}", e)))?;
    Ok(buffer)
}

#[cfg(not(feature = "avif"))]
pub fn encode_avif(_img: &DynamicImage, _quality: u8) -> Result<Vec<u8>> {
    Err(AppError::ImageProcessing(
        "AVIF support is not compiled in".to_string(),
    ))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        AppError::FileSystem(format!(
            "Failed to create image directory {}: {}",
            dir.display(),
            e
        ))
    })
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data)
        .map_err(|e| AppError::FileSystem(format!("Failed to write {}: {}", path.display(), e)))
}

fn delete_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        fs::remove_file(&path).map_err(|e| {
            AppError::FileSystem(format!("Failed to remove {}: {}", path.display(), e))
        })?;
    }
    fs::remove_dir(dir).map_err(|e| {
        AppError::FileSystem(format!("Failed to remove {}: {}", dir.display(), e))
    })?;
    log_info!(dir = %dir.display(), "Deleted image directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgba};
    use std::io::Cursor;
    use tempfile::TempDir;

    // Gradient PNG so resizes and encodes have real content
    fn create_test_image(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let r = (x % 256) as u8;
            let g = (y % 256) as u8;
            let b = ((x + y) % 256) as u8;
            Rgb([r, g, b])
        });

        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn create_solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)))
    }

    fn create_service(temp_dir: &TempDir) -> ImageService {
        ImageService::new(temp_dir.path().join("uploads"), "/static/uploads/dishes").with_avif(false)
    }

    fn file_on_disk(service: &ImageService, id: i64, public: &str) -> PathBuf {
        let name = public.rsplit('/').next().unwrap();
        service.entity_dir(id).join(name)
    }

    #[tokio::test]
    async fn test_generate_writes_four_webp_files_within_bounds() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let set = service.generate(&create_test_image(800, 400), 7).await.unwrap();

        for spec in FILE_SIZES.iter() {
            let public = set.get(spec.derivative).unwrap();
            assert!(public.starts_with("/static/uploads/dishes/7/"));
            assert!(public.ends_with(".webp"));

            let bytes = fs::read(file_on_disk(&service, 7, public)).unwrap();
            let img = image::load_from_memory(&bytes).unwrap();
            let (w, h) = img.dimensions();
            assert!(w.max(h) <= spec.bound);
            // Never larger than the source
            assert!(w <= 800 && h <= 400);
        }

        let thumb = image::load_from_memory(
            &fs::read(file_on_disk(&service, 7, set.get(Derivative::Thumbnail).unwrap())).unwrap(),
        )
        .unwrap();
        assert_eq!(thumb.dimensions(), (150, 75));

        let large = image::load_from_memory(
            &fs::read(file_on_disk(&service, 7, set.get(Derivative::Large).unwrap())).unwrap(),
        )
        .unwrap();
        assert_eq!(large.dimensions(), (800, 400));

        assert!(set.get(Derivative::SmallAvif).is_none());
        assert_eq!(fs::read_dir(service.entity_dir(7)).unwrap().count(), 4);
    }

    #[tokio::test]
    async fn test_generate_shares_one_version_stamp() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let set = service.generate(&create_test_image(64, 64), 1).await.unwrap();
        let versions: Vec<i64> = FILE_SIZES
            .iter()
            .map(|s| {
                let name = set.get(s.derivative).unwrap().rsplit('/').next().unwrap();
                parse_file_name(name).unwrap().1
            })
            .collect();

        assert!(versions.windows(2).all(|w| w[0] == w[1]));
        assert!(set.get(Derivative::Small).unwrap().contains(&format!("small_{}.webp", versions[0])));
    }

    #[tokio::test]
    async fn test_generate_inline_placeholder_and_color() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let set = service.generate(&create_test_image(300, 200), 3).await.unwrap();

        let tiny = set.get(Derivative::TinyBase64).unwrap();
        let payload = tiny.strip_prefix("data:image/webp;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload).unwrap();
        let preview = image::load_from_memory(&bytes).unwrap();
        assert!(preview.width() <= 20 && preview.height() <= 20);
        assert_eq!(preview.dimensions(), (20, 13));

        let color = set.get(Derivative::DominantColor).unwrap();
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
        assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_generate_rejects_undecodable_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let result = service.generate(b"definitely not an image", 9).await;
        assert!(matches!(result, Err(AppError::ImageDecode(_))));
        // Nothing is written before decoding succeeds
        assert!(!service.entity_dir(9).exists());
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_fn(4, 4, |x, _| {
            if x < 2 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([10, 20, 30, 255])
            }
        }));

        let flat = flatten_to_rgb(img).to_rgb8();
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(flat.get_pixel(3, 3).0, [10, 20, 30]);
    }

    #[test]
    fn test_half_transparent_pixel_blends_with_white() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let flat = flatten_to_rgb(img).to_rgb8();
        assert_eq!(flat.get_pixel(0, 0).0, [127, 127, 127]);
    }

    #[test]
    fn test_dominant_color_is_channel_mean() {
        assert_eq!(dominant_color(&create_solid_image(1, 1, [255, 0, 16])), "#ff0010");

        // Half red, half blue
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgb([200, 0, 0])
            } else {
                Rgb([0, 0, 100])
            }
        }));
        assert_eq!(dominant_color(&img), "#640032");
    }

    #[test]
    fn test_fit_within_never_upscales() {
        let small = create_solid_image(40, 30, [1, 2, 3]);
        assert_eq!(fit_within(&small, 150).dimensions(), (40, 30));

        let wide = create_solid_image(3000, 1000, [1, 2, 3]);
        assert_eq!(fit_within(&wide, 600).dimensions(), (600, 200));

        let tall = create_solid_image(500, 2500, [1, 2, 3]);
        assert_eq!(fit_within(&tall, 1200).dimensions(), (240, 1200));
    }

    #[test]
    fn test_webp_quality_affects_size() {
        let img = image::load_from_memory(&create_test_image(256, 256)).unwrap();
        let low = encode_webp(&img, 30).unwrap();
        let high = encode_webp(&img, 96).unwrap();

        assert!(low.len() < high.len());
        assert_eq!(&high[0..4], b"RIFF");
        assert_eq!(&high[8..12], b"WEBP");
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("large_1700000000.webp"),
            Some((Derivative::Large, 1_700_000_000))
        );
        assert_eq!(
            parse_file_name("medium_42.avif"),
            Some((Derivative::MediumAvif, 42))
        );
        assert_eq!(parse_file_name("thumbnail_42.avif"), None);
        assert_eq!(parse_file_name("large_.webp"), None);
        assert_eq!(parse_file_name("large_12.png"), None);
        assert_eq!(parse_file_name("notes.txt"), None);
        assert_eq!(file_name(Derivative::SmallAvif, 5), "small_5.avif");
    }

    #[tokio::test]
    async fn test_delete_removes_directory_and_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        service.generate(&create_test_image(32, 32), 4).await.unwrap();
        assert!(service.entity_dir(4).exists());

        service.delete(4).await.unwrap();
        assert!(!service.entity_dir(4).exists());

        service.delete(4).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_then_generate_uses_newer_version() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        service.generate(&create_test_image(32, 32), 5).await.unwrap();
        let first = service.existing_versions(5).unwrap()[&Derivative::Large].version;

        service.delete(5).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        service.generate(&create_test_image(32, 32), 5).await.unwrap();
        let second = service.existing_versions(5).unwrap()[&Derivative::Large].version;

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_copy_duplicates_bytes_under_new_paths() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let source = service.generate(&create_test_image(120, 90), 10).await.unwrap();
        let copied = service.copy(10, 11).await.unwrap();

        for spec in FILE_SIZES.iter() {
            let src = source.get(spec.derivative).unwrap();
            let dst = copied.get(spec.derivative).unwrap();
            assert_ne!(src, dst);
            assert!(dst.starts_with("/static/uploads/dishes/11/"));
            assert_eq!(
                fs::read(file_on_disk(&service, 10, src)).unwrap(),
                fs::read(file_on_disk(&service, 11, dst)).unwrap()
            );
        }
        assert!(copied.get(Derivative::TinyBase64).unwrap().starts_with("data:image/webp;base64,"));
        assert!(copied.get(Derivative::DominantColor).is_some());
    }

    #[tokio::test]
    async fn test_copy_picks_newest_version_and_handles_missing_large() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let dir = service.entity_dir(20);
        fs::create_dir_all(&dir).unwrap();
        let img = create_solid_image(10, 10, [9, 9, 9]);
        fs::write(dir.join("small_100.webp"), encode_webp(&img, 50).unwrap()).unwrap();
        fs::write(dir.join("small_200.webp"), encode_webp(&img, 90).unwrap()).unwrap();
        fs::write(dir.join("readme.txt"), "ignored").unwrap();

        let copied = service.copy(20, 21).await.unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(
            fs::read(file_on_disk(&service, 21, copied.get(Derivative::Small).unwrap())).unwrap(),
            fs::read(dir.join("small_200.webp")).unwrap()
        );
        assert!(copied.get(Derivative::TinyBase64).is_none());
    }

    #[tokio::test]
    async fn test_copy_from_empty_source() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let copied = service.copy(30, 31).await.unwrap();
        assert!(copied.is_empty());
        assert!(!service.entity_dir(31).exists());
    }

    #[tokio::test]
    async fn test_regenerate_prefers_large_and_keeps_versions() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let dir = service.entity_dir(40);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("medium_111.webp"),
            encode_webp(&create_solid_image(30, 30, [0, 0, 255]), 90).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.join("large_111.webp"),
            encode_webp(&create_solid_image(30, 30, [255, 255, 255]), 90).unwrap(),
        )
        .unwrap();

        let set = service.regenerate(40).await.unwrap().unwrap();
        let color = set.get(Derivative::DominantColor).unwrap();
        // Derived from the white large file, not the blue medium one
        assert!(u8::from_str_radix(&color[1..3], 16).unwrap() > 200);
        assert!(set.get(Derivative::TinyBase64).is_some());
        assert!(set.get(Derivative::Large).is_none());
    }

    #[tokio::test]
    async fn test_regenerate_falls_back_to_medium() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        let dir = service.entity_dir(41);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("medium_5.webp"),
            encode_webp(&create_solid_image(30, 30, [0, 0, 0]), 90).unwrap(),
        )
        .unwrap();

        let set = service.regenerate(41).await.unwrap().unwrap();
        let color = set.get(Derivative::DominantColor).unwrap();
        assert!(u8::from_str_radix(&color[1..3], 16).unwrap() < 30);
    }

    #[tokio::test]
    async fn test_regenerate_without_source() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        assert!(service.regenerate(50).await.unwrap().is_none());

        let dir = service.entity_dir(51);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("thumbnail_1.webp"),
            encode_webp(&create_solid_image(8, 8, [1, 1, 1]), 50).unwrap(),
        )
        .unwrap();
        assert!(service.regenerate(51).await.unwrap().is_none());
    }

    fn failing_avif_encoder(_img: &DynamicImage, _quality: u8) -> Result<Vec<u8>> {
        Err(AppError::ImageProcessing("encoder unavailable".to_string()))
    }

    #[tokio::test]
    async fn test_avif_failure_keeps_webp_and_omits_avif_keys() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir).with_avif_encoder(failing_avif_encoder);

        let set = service.generate(&create_test_image(64, 48), 62).await.unwrap();

        for derivative in [Derivative::Small, Derivative::Medium, Derivative::Large] {
            let path = set.get(derivative).unwrap();
            assert!(file_on_disk(&service, 62, path).exists());
        }
        for avif in [
            Derivative::SmallAvif,
            Derivative::MediumAvif,
            Derivative::LargeAvif,
        ] {
            assert!(!set.contains(avif));
        }
        assert!(set.contains(Derivative::Thumbnail));
        assert!(set.contains(Derivative::TinyBase64));
        // Only the four WebP files were written
        assert_eq!(fs::read_dir(service.entity_dir(62)).unwrap().count(), 4);
    }

    #[cfg(feature = "avif")]
    #[tokio::test]
    async fn test_generate_with_avif_copies() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir).with_avif(true);

        let set = service.generate(&create_test_image(48, 32), 60).await.unwrap();

        for (webp, avif) in [
            (Derivative::Small, Derivative::SmallAvif),
            (Derivative::Medium, Derivative::MediumAvif),
            (Derivative::Large, Derivative::LargeAvif),
        ] {
            let webp_path = set.get(webp).unwrap();
            let avif_path = set.get(avif).unwrap();
            assert_eq!(
                webp_path.trim_end_matches(".webp"),
                avif_path.trim_end_matches(".avif")
            );
            assert!(fs::metadata(file_on_disk(&service, 60, avif_path)).unwrap().len() > 0);
        }
        assert_eq!(fs::read_dir(service.entity_dir(60)).unwrap().count(), 7);
    }

    #[cfg(feature = "avif")]
    #[tokio::test]
    async fn test_regenerate_backfills_avif_with_existing_version() {
        let temp_dir = TempDir::new().unwrap();
        let service = create_service(&temp_dir);

        service.generate(&create_test_image(40, 40), 61).await.unwrap();
        let version = service.existing_versions(61).unwrap()[&Derivative::Small].version;

        let set = service.with_avif(true).regenerate(61).await.unwrap().unwrap();
        assert!(set
            .get(Derivative::SmallAvif)
            .unwrap()
            .ends_with(&format!("small_{}.avif", version)));
        assert!(set.get(Derivative::LargeAvif).is_some());
    }
}
