//! JNI exports for `com.mp3cast.Mp3Cast`
//!
//! Java strings and arrays are copied into Rust buffers on the way in and
//! copied back on the way out. No array elements stay pinned, and each
//! `JavaStr` is released when it drops, on every return path.
//!
//! Expected Java side:
//!
//! ```java
//! public class Mp3Cast {
//!     public static native String getEncoderVersion();
//!     public static native int convertFileToMp3(String in, int inRate, int channels,
//!             String out, int outRate, boolean isWav, int quality);
//!     public static native int initEncoder(int inRate, int channels, int outRate, int quality);
//!     public static native int encode(short[] left, short[] right, int samples, byte[] mp3);
//!     public static native int flush(byte[] mp3, String out);
//!     public static native void closeEncoder();
//!
//!     static void onConvertProgress(float percent) { ... }
//!     static void onConvertEnd() { ... }
//! }
//! ```
//!
//! The callbacks run while the conversion holds the encoder lock. Calling
//! `encode`, `initEncoder`, `flush` or `closeEncoder` from inside them
//! returns the busy code (-13) and does nothing.

use jni::objects::{JByteArray, JClass, JShortArray, JString, JValue};
use jni::sys::{jboolean, jint, jstring, JNI_FALSE};
use jni::JNIEnv;

use crate::convert::ConvertListener;
use crate::error::{log_error, Error, ErrorCode, Result};

fn jni_error(err: jni::errors::Error) -> Error {
    Error::InvalidInput(format!("JNI: {}", err))
}

fn code(result: Result<usize>, context: &str) -> jint {
    match result {
        Ok(n) => jint::try_from(n).unwrap_or(jint::MAX),
        Err(e) => {
            log_error(&e, context);
            e.code()
        }
    }
}

fn read_string(env: &mut JNIEnv, value: &JString) -> Result<String> {
    Ok(env.get_string(value).map_err(jni_error)?.into())
}

fn read_shorts(env: &mut JNIEnv, array: &JShortArray) -> Result<Vec<i16>> {
    let len = env.get_array_length(array).map_err(jni_error)?;
    let mut buf = vec![0i16; len.max(0) as usize];
    env.get_short_array_region(array, 0, &mut buf).map_err(jni_error)?;
    Ok(buf)
}

fn byte_capacity(env: &mut JNIEnv, array: &JByteArray) -> Result<usize> {
    Ok(env.get_array_length(array).map_err(jni_error)?.max(0) as usize)
}

fn write_bytes(env: &mut JNIEnv, array: &JByteArray, bytes: &[u8]) -> Result<()> {
    let signed: Vec<i8> = bytes.iter().map(|&b| b as i8).collect();
    env.set_byte_array_region(array, 0, &signed).map_err(jni_error)
}

/// Forwards progress to static callbacks on the calling class
struct JniListener<'a, 'local> {
    env: &'a mut JNIEnv<'local>,
    class: &'a JClass<'local>,
}

impl JniListener<'_, '_> {
    fn call(&mut self, name: &str, sig: &str, args: &[JValue]) -> Result<()> {
        match self.env.call_static_method(self.class, name, sig, args) {
            Ok(_) => Ok(()),
            Err(e) => {
                // a missing method leaves NoSuchMethodError pending
                if let Err(clear) = self.env.exception_clear() {
                    log::warn!("{}: could not clear pending exception: {}", name, clear);
                }
                Err(Error::Listener(format!("{}{}: {}", name, sig, e)))
            }
        }
    }
}

impl ConvertListener for JniListener<'_, '_> {
    fn on_progress(&mut self, percent: f32) -> Result<()> {
        self.call("onConvertProgress", "(F)V", &[JValue::Float(percent)])
    }

    fn on_end(&mut self) -> Result<()> {
        self.call("onConvertEnd", "()V", &[])
    }
}

#[no_mangle]
pub extern "system" fn Java_com_mp3cast_Mp3Cast_getEncoderVersion<'local>(
    #[allow(unused_mut)] mut env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jstring {
    match env.new_string(super::encoder_version()) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            log::error!("getEncoderVersion: {}", e);
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "system" fn Java_com_mp3cast_Mp3Cast_convertFileToMp3<'local>(
    mut env: JNIEnv<'local>,
    class: JClass<'local>,
    in_path: JString<'local>,
    in_sample_rate: jint,
    channels: jint,
    out_path: JString<'local>,
    out_sample_rate: jint,
    is_wav: jboolean,
    quality: jint,
) -> jint {
    let result = (|| -> Result<usize> {
        let input = read_string(&mut env, &in_path)?;
        let output = read_string(&mut env, &out_path)?;
        log::info!("convertFileToMp3: {} -> {}", input, output);

        let mut listener = JniListener {
            env: &mut env,
            class: &class,
        };
        super::try_convert(
            &input,
            in_sample_rate,
            channels,
            &output,
            out_sample_rate,
            is_wav != JNI_FALSE,
            quality,
            &mut listener,
        )
    })();
    code(result, "convertFileToMp3")
}

#[no_mangle]
pub extern "system" fn Java_com_mp3cast_Mp3Cast_initEncoder<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    in_sample_rate: jint,
    channels: jint,
    out_sample_rate: jint,
    quality: jint,
) -> jint {
    code(
        super::try_init_encoder(in_sample_rate, channels, out_sample_rate, quality),
        "initEncoder",
    )
}

#[no_mangle]
pub extern "system" fn Java_com_mp3cast_Mp3Cast_encode<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    left: JShortArray<'local>,
    right: JShortArray<'local>,
    samples: jint,
    mp3_buffer: JByteArray<'local>,
) -> jint {
    let result = (|| -> Result<usize> {
        let left = read_shorts(&mut env, &left)?;
        let right = read_shorts(&mut env, &right)?;
        let mut out = vec![0u8; byte_capacity(&mut env, &mp3_buffer)?];

        let written = super::try_encode(&left, &right, samples, &mut out)?;
        write_bytes(&mut env, &mp3_buffer, &out[..written])?;
        Ok(written)
    })();
    code(result, "encode")
}

#[no_mangle]
pub extern "system" fn Java_com_mp3cast_Mp3Cast_flush<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    mp3_buffer: JByteArray<'local>,
    out_path: JString<'local>,
) -> jint {
    let result = (|| -> Result<usize> {
        let output = read_string(&mut env, &out_path)?;
        let mut out = vec![0u8; byte_capacity(&mut env, &mp3_buffer)?];

        let flushed = super::try_flush(&mut out, &output)?;
        write_bytes(&mut env, &mp3_buffer, &out[..flushed])?;
        Ok(flushed)
    })();
    code(result, "flush")
}

#[no_mangle]
pub extern "system" fn Java_com_mp3cast_Mp3Cast_closeEncoder<'local>(_env: JNIEnv<'local>, _class: JClass<'local>) {
    super::close_encoder();
}
