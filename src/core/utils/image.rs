//! image 与 tensor 相互转换
//!
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::{
    DynamicImage, GenericImageView, GrayImage, ImageDecoder, ImageReader, RgbImage, RgbaImage,
};

use crate::error::Error;

/// 读取图片并按 EXIF 方向信息旋转
pub fn load_image(path: &Path) -> Result<DynamicImage, Error> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;

    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    Ok(image)
}

/// 将图像转换为张量
///
/// output: HWC, RGB, 数值范围 [0, 1]
pub fn image_to_tensor(image: &DynamicImage, device: &Device) -> Result<Tensor, Error> {
    let (width, height) = image.dimensions();

    let img_buffer = image.to_rgb32f().into_raw();
    // HWC
    let tensor = Tensor::from_vec(img_buffer, (height as usize, width as usize, 3), device)?;

    Ok(tensor)
}

/// 将张量转换为图像
///
/// tensor: BHWC
pub fn tensor_to_images(tensor: &Tensor) -> Result<Vec<DynamicImage>, Error> {
    let (batch, _, _, _) = tensor.dims4()?;

    // BHWC -> Vec<1HWC>
    let tensors = tensor.chunk(batch, 0)?;

    let mut images = Vec::with_capacity(batch);
    for tensor in tensors.iter() {
        images.push(tensor_to_image(tensor)?);
    }

    Ok(images)
}

/// 将张量转换为图像
///
/// tensor: HWC/1HWC
pub fn tensor_to_image(tensor: &Tensor) -> Result<DynamicImage, Error> {
    let (height, width, channels) = match tensor.dims() {
        [h, w, c] => (*h, *w, *c),
        [1, h, w, c] => (*h, *w, *c),
        _ => {
            return Err(Error::InvalidTensorShape(format!(
                "expected [H, W, C] or [1, H, W, C], got {:?}",
                tensor.dims()
            )));
        }
    };

    // 缩放并裁剪到 0-255
    let tensor = (tensor.to_dtype(DType::F32)? * 255.0)?;
    let tensor = tensor.clamp(0.0, 255.0)?;
    let tensor = tensor.to_dtype(DType::U8)?;

    let buffer = tensor.contiguous()?.flatten_all()?.to_vec1::<u8>()?;

    match channels {
        1 => {
            let img = GrayImage::from_raw(width as u32, height as u32, buffer)
                .ok_or(Error::ImageBuffer)?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        3 => {
            let img = RgbImage::from_raw(width as u32, height as u32, buffer)
                .ok_or(Error::ImageBuffer)?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        4 => {
            let img = RgbaImage::from_raw(width as u32, height as u32, buffer)
                .ok_or(Error::ImageBuffer)?;
            Ok(DynamicImage::ImageRgba8(img))
        }
        _ => Err(Error::UnsupportedNumberOfChannels(channels as u32)),
    }
}
