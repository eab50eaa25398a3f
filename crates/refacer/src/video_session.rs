//! End-to-end video refacing.

use rand::Rng;
use reface_core::{FramePipeline, FrameProcessor, PipelineReport};
use reface_media::{probe_video, remux, MediaError, VideoInfo, VideoReader, VideoWriter};
use std::path::{Path, PathBuf};

use crate::error::RefaceError;
use crate::face_config::FaceConfig;
use crate::output;
use crate::prepare::{prepare_faces, RefaceOptions};
use crate::Refacer;

/// Files produced by one video session.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoOutcome {
    /// Final video: the remuxed copy when source audio was carried over.
    pub video: PathBuf,
    /// Looping GIF export, for GIF inputs.
    pub gif: Option<PathBuf>,
    pub report: PipelineReport,
}

/// What a video session does around the frame pipeline, decided up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoPlan {
    /// Keep every n-th source frame.
    pub skip_rate: usize,
    /// Carry the source audio into a remuxed copy.
    pub remux_audio: bool,
    /// Export a looping GIF of the final video.
    pub export_gif: bool,
}

impl VideoPlan {
    /// Preview renders sample the video and drop the audio; GIF inputs get a GIF back.
    pub fn new(input: &Path, info: &VideoInfo, preview: bool, preview_skip_rate: usize) -> Self {
        Self {
            skip_rate: if preview { preview_skip_rate.max(1) } else { 1 },
            remux_audio: info.has_audio && !preview,
            export_gif: output::is_gif(input),
        }
    }
}

impl Refacer {
    /// Reface every (or, in preview mode, every n-th) frame of a video.
    ///
    /// Any failure aborts the session. A partially written output file is
    /// left on disk.
    pub fn reface_video(
        &self,
        input: &Path,
        faces: &[FaceConfig],
        options: &RefaceOptions,
    ) -> Result<VideoOutcome, RefaceError> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()).into());
        }
        let info = probe_video(input)?;

        std::fs::create_dir_all(&self.config.output_dir)?;
        let rendered_path = output::video_output_path(
            &self.config.output_dir,
            input,
            options.preview,
            output::unix_timestamp(),
        );

        let session = prepare_faces(&self.engine, faces, options, self.config.default_threshold)?;

        let plan = VideoPlan::new(input, &info, options.preview, self.config.preview_skip_rate);

        tracing::info!(
            input = %input.display(),
            output = %rendered_path.display(),
            frames = info.frame_count,
            fps = info.fps,
            skip_rate = plan.skip_rate,
            remux = plan.remux_audio,
            gif = plan.export_gif,
            workers = self.workers,
            "video session started"
        );

        let reader = VideoReader::open(input, &info, plan.skip_rate)?;
        let mut writer =
            VideoWriter::create(&rendered_path, info.width, info.height, info.fps, &self.encoder)?;

        let processor = FrameProcessor::new(&self.engine, &session);
        let pipeline = FramePipeline::new(self.workers, self.config.batch_size)?;
        let report = pipeline.run(
            reader.map(|frame| frame.map_err(RefaceError::from)),
            |frame| processor.process(frame).map_err(RefaceError::from),
            |frame| writer.write_frame(&frame).map_err(RefaceError::from),
        )?;
        let rendered = writer.finish()?;

        let video = if plan.remux_audio {
            let remuxed = remux::remux_path(&rendered, rand::thread_rng().gen_range(0..1000));
            remux::remux_audio(&rendered, input, &remuxed)?
        } else {
            rendered
        };

        let gif = if plan.export_gif {
            Some(remux::export_gif(&video)?)
        } else {
            None
        };

        tracing::info!(
            video = %video.display(),
            frames = report.frames,
            batches = report.batches.len(),
            "refaced video saved"
        );
        Ok(VideoOutcome { video, gif, report })
    }
}
