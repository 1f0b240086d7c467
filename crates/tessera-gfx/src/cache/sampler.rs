use ash::vk;

use crate::error::VkResultExt;
use crate::foundation::device::GfxDevice;

/// sampler 的缓存 key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    /// 0 表示不开启各向异性过滤
    pub max_anisotropy: u32,
    pub compare_op: Option<vk::CompareOp>,
    pub mipmap_mode: vk::SamplerMipmapMode,
}

impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 0,
            compare_op: None,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        }
    }
}

impl GfxSamplerDesc {
    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            ..Default::default()
        }
    }
}

pub(crate) fn create_vk_sampler(device: &GfxDevice, desc: &GfxSamplerDesc) -> vk::Sampler {
    let mut create_info = vk::SamplerCreateInfo::default()
        .mag_filter(desc.mag_filter)
        .min_filter(desc.min_filter)
        .address_mode_u(desc.address_mode_u)
        .address_mode_v(desc.address_mode_v)
        .address_mode_w(desc.address_mode_w)
        .mipmap_mode(desc.mipmap_mode)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

    if desc.max_anisotropy > 0 {
        create_info = create_info.anisotropy_enable(true).max_anisotropy(desc.max_anisotropy as f32);
    } else {
        create_info = create_info.anisotropy_enable(false);
    }

    if let Some(compare_op) = desc.compare_op {
        create_info = create_info.compare_enable(true).compare_op(compare_op);
    } else {
        create_info = create_info.compare_enable(false);
    }

    unsafe { device.create_sampler(&create_info, None).or_fatal("create sampler") }
}
