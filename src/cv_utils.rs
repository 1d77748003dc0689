use crate::config::{OverlayConfig, ResizeConfig};
use opencv::{
    core::{Mat, Point, Rect, Scalar, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to resize frame: {0}")]
    ResizeFailed(opencv::Error),
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("Encoder rejected the frame")]
    EncodeRejected,
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CvUtilsError {
    fn from(err: opencv::Error) -> Self {
        CvUtilsError::OpenCvError(err)
    }
}

/// Compresses a frame to JPEG, optionally downscaling it first to keep the
/// request payload small.
pub fn encode_jpeg(
    frame: &Mat,
    resize: Option<ResizeConfig>,
    quality: i32,
) -> Result<Vec<u8>, CvUtilsError> {
    let mut params = Vector::<i32>::new();
    params.push(imgcodecs::IMWRITE_JPEG_QUALITY);
    params.push(quality);

    let mut buf = Vector::<u8>::new();
    let ok = match resize {
        Some(target) => {
            let mut resized = Mat::default();
            imgproc::resize(
                frame,
                &mut resized,
                Size::new(target.width, target.height),
                0.0,
                0.0,
                imgproc::INTER_AREA,
            )
            .map_err(CvUtilsError::ResizeFailed)?;
            imgcodecs::imencode(".jpg", &resized, &mut buf, &params)
                .map_err(CvUtilsError::EncodeFrameFailed)?
        }
        None => imgcodecs::imencode(".jpg", frame, &mut buf, &params)
            .map_err(CvUtilsError::EncodeFrameFailed)?,
    };
    if !ok || buf.is_empty() {
        return Err(CvUtilsError::EncodeRejected);
    }
    Ok(buf.into())
}

/// Draws the caption onto the frame at the configured origin, word-wrapped so
/// long captions stay inside the frame, with an optional filled strip behind
/// each line for legibility.
pub fn draw_caption(
    frame: &mut Mat,
    caption: &str,
    overlay: &OverlayConfig,
) -> Result<(), CvUtilsError> {
    let color = Scalar::new(
        overlay.color.b as f64,
        overlay.color.g as f64,
        overlay.color.r as f64,
        0.0,
    );
    let font = imgproc::FONT_HERSHEY_SIMPLEX;

    let mut baseline = 0;
    let glyph = imgproc::get_text_size("M", font, overlay.font_scale, overlay.thickness, &mut baseline)?;
    let usable_width = (frame.cols() - 2 * overlay.origin_x).max(glyph.width);
    let max_chars = (usable_width / glyph.width.max(1)).max(1) as usize;
    let line_height = glyph.height + baseline + 6;

    for (i, line) in wrap_words(caption, max_chars).iter().enumerate() {
        let origin = Point::new(
            overlay.origin_x,
            overlay.origin_y + i as i32 * line_height,
        );

        if overlay.background {
            let size = imgproc::get_text_size(
                line,
                font,
                overlay.font_scale,
                overlay.thickness,
                &mut baseline,
            )?;
            imgproc::rectangle(
                frame,
                Rect::new(
                    origin.x - 4,
                    origin.y - size.height - 4,
                    size.width + 8,
                    size.height + baseline + 8,
                ),
                Scalar::new(0.0, 0.0, 0.0, 0.0),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )?;
        }

        imgproc::put_text(
            frame,
            line,
            origin,
            font,
            overlay.font_scale,
            color,
            overlay.thickness,
            imgproc::LINE_AA,
            false,
        )?;
    }
    Ok(())
}

/// Greedy word wrap. Words longer than `max_chars` get a line of their own
/// rather than being split.
fn wrap_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC3;

    fn test_frame() -> Mat {
        Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::new(40.0, 80.0, 120.0, 0.0))
            .unwrap()
    }

    #[test]
    fn encode_jpeg_produces_jpeg_magic() {
        let frame = test_frame();
        let buf = encode_jpeg(&frame, None, 80).unwrap();
        assert_eq!(&buf[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn encode_jpeg_resizes_before_compressing() {
        let frame = test_frame();
        let target = ResizeConfig {
            width: 32,
            height: 24,
        };
        let buf = encode_jpeg(&frame, Some(target), 80).unwrap();
        let decoded =
            imgcodecs::imdecode(&Vector::from_slice(&buf), imgcodecs::IMREAD_COLOR).unwrap();
        assert_eq!((decoded.cols(), decoded.rows()), (32, 24));
    }

    #[test]
    fn quality_trades_size() {
        let frame = test_frame();
        let high = encode_jpeg(&frame, None, 95).unwrap();
        let low = encode_jpeg(&frame, None, 10).unwrap();
        assert!(low.len() <= high.len());
    }

    #[test]
    fn wrap_words_respects_limit() {
        let lines = wrap_words("a small dog sitting on a wooden table", 12);
        assert!(lines.iter().all(|l| l.len() <= 12), "{lines:?}");
        assert_eq!(lines.join(" "), "a small dog sitting on a wooden table");
    }

    #[test]
    fn wrap_words_keeps_oversized_word_whole() {
        let lines = wrap_words("an extraordinarily long caption", 10);
        assert!(lines.contains(&"extraordinarily".to_string()));
    }

    #[test]
    fn wrap_words_empty_input() {
        assert!(wrap_words("", 10).is_empty());
        assert!(wrap_words("   ", 10).is_empty());
    }
}
