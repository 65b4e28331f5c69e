// SPDX-FileCopyrightText: © 2025 CommKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Watermark plugin
//!
//! Stamps a small opaque marker into the corner of outgoing video frames.
//! Mostly a demonstration of the call media handler surface: stream
//! filtering, in-place frame processing and live preference updates.

use commkit_plugin_sdk_native::prelude::*;

/// Marker square edge, in pixels.
const MARK_SIZE: u32 = 16;

struct Watermark {
    logger: Logger,
    enabled: bool,
    attached_streams: usize,
}

impl Watermark {
    /// Paint the marker into the top-left corner. Frames are packed pixel
    /// buffers; the marker just saturates the first bytes of each row it
    /// covers, which is format-agnostic enough for a demo.
    fn stamp(&self, width: u32, height: u32, data: &mut [u8]) {
        if width == 0 || height == 0 {
            return;
        }
        let stride = data.len() as u32 / height;
        let mark_rows = MARK_SIZE.min(height);
        let mark_bytes = (MARK_SIZE.min(width) * stride / width) as usize;
        for row in 0..mark_rows {
            let start = (row * stride) as usize;
            let end = (start + mark_bytes).min(data.len());
            for byte in &mut data[start..end] {
                *byte = 0xFF;
            }
        }
    }
}

impl CallMediaProcessor for Watermark {
    fn details(&mut self) -> Vec<(String, String)> {
        vec![
            ("name".to_string(), "Watermark".to_string()),
            ("iconPath".to_string(), "watermark.svg".to_string()),
            ("attached".to_string(), if self.attached_streams > 0 { "1" } else { "0" }.to_string()),
            ("dataType".to_string(), "1".to_string()),
        ]
    }

    fn wants_stream(&mut self, stream: &StreamData) -> bool {
        // Only outgoing video carries the watermark.
        if stream.stream_type != StreamType::Video
            || stream.direction != StreamDirection::Outbound
        {
            return false;
        }
        self.attached_streams += 1;
        plugin_info!(self.logger, "Watermarking call {}", stream.call_id);
        true
    }

    fn process_frame(&mut self, _stream: &StreamData, frame: FrameViewMut<'_>) {
        if !self.enabled {
            return;
        }
        if let FrameViewMut::Video { width, height, data } = frame {
            self.stamp(width, height, data);
        }
    }

    fn stream_detached(&mut self, stream: &StreamData) {
        self.attached_streams = self.attached_streams.saturating_sub(1);
        plugin_debug!(self.logger, "Detached from call {}", stream.call_id);
    }

    fn set_preference(&mut self, key: &str, value: &str) {
        if key == "WatermarkEnabled" {
            self.enabled = value == "1";
        }
    }

    fn has_preference_key(&mut self, key: &str) -> bool {
        key == "WatermarkEnabled"
    }
}

struct WatermarkPlugin;

impl NativePlugin for WatermarkPlugin {
    fn init(host: &HostApi) -> Result<Self, String> {
        let logger = host.logger("watermark");
        let enabled = host
            .plugin_preferences()
            .get("WatermarkEnabled")
            .is_none_or(|value| value == "1");
        host.manage_call_media_processor(Watermark { logger, enabled, attached_streams: 0 })?;
        Ok(Self)
    }
}

native_plugin_entry!(WatermarkPlugin);
