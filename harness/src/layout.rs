// layout.rs - Entry points and globals of libAudio32Encoder.so
//
// Offsets were recovered from one exact build (armeabi-v7a, shipped with the
// CloudPets companion app) and are meaningless for any other build.

/// Known entry offsets and global addresses of one image revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// MD5 of the image file, lowercase hex
    pub md5: &'static str,

    /// `audio_encode_init(sample_rate)`
    pub audio_encode_init: u32,
    /// `audio_encode(const int16_t *samples)`
    pub audio_encode: u32,
    /// `endianessT(value)`, a pure byte-order transform
    pub endianess_t: u32,

    pub gl_history: u32,
    pub gl_history_len: usize,
    pub gl_out_words: u32,
    pub gl_frame_cnt: u32,
    pub gl_mag_shift: u32,
    pub gl_mlt_coefs: u32,
    pub gl_mlt_coefs_len: usize,
    pub gl_number_of_16bit_words_per_frame: u32,
}

pub const AUDIO32_ENCODER: Layout = Layout {
    md5: "a7423f06f95e270c86cb89dcf8d57ed8",
    audio_encode_init: 0x3108,
    audio_encode: 0x3530,
    endianess_t: 0x41b8,
    gl_history: 0x1b9bc,
    gl_history_len: 640,
    gl_out_words: 0x1b92c,
    gl_frame_cnt: 0xeae4,
    gl_mag_shift: 0x1af1c,
    gl_mlt_coefs: 0x1af24,
    gl_mlt_coefs_len: 640,
    gl_number_of_16bit_words_per_frame: 0x1b928,
};

impl Layout {
    /// Every range the harness relies on, with a name for error reporting.
    /// Entry points count as one Thumb halfword; gl_out_words is sized by
    /// words-per-frame at run time, so only its first word is known here.
    pub fn regions(&self) -> [(&'static str, u32, u32); 9] {
        [
            ("audio_encode_init", self.audio_encode_init, 2),
            ("audio_encode", self.audio_encode, 2),
            ("endianessT", self.endianess_t, 2),
            ("gl_history", self.gl_history, self.gl_history_len as u32),
            ("gl_out_words", self.gl_out_words, 2),
            ("gl_frame_cnt", self.gl_frame_cnt, 4),
            ("gl_mag_shift", self.gl_mag_shift, 4),
            ("gl_mlt_coefs", self.gl_mlt_coefs, self.gl_mlt_coefs_len as u32),
            (
                "gl_number_of_16bit_words_per_frame",
                self.gl_number_of_16bit_words_per_frame,
                2,
            ),
        ]
    }
}
