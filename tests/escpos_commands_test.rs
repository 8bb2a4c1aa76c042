// Integration tests for ESC/POS command generation

use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use receipt_print_server::escpos::{
    format_image_receipt, Alignment, CodePage, ESCPOSBuilder, PaperWidth, RASTER_BAND_ROWS,
};

fn build(f: impl FnOnce(&mut ESCPOSBuilder)) -> Vec<u8> {
    let mut builder = ESCPOSBuilder::new();
    f(&mut builder);
    builder.build()
}

#[test]
fn test_initialize_printer_command() {
    // ESC @
    assert_eq!(build(|b| { b.initialize(); }), [0x1B, 0x40]);
}

#[test]
fn test_alignment_commands() {
    assert_eq!(build(|b| { b.align(Alignment::Left); }), [0x1B, 0x61, 0x00]);
    assert_eq!(build(|b| { b.align(Alignment::Center); }), [0x1B, 0x61, 0x01]);
    assert_eq!(build(|b| { b.align(Alignment::Right); }), [0x1B, 0x61, 0x02]);
}

#[test]
fn test_code_page_command() {
    // ESC t 13 - PC857 Turkish
    assert_eq!(build(|b| { b.code_page(CodePage::PC857Turkish); }), [0x1B, 0x74, 13]);
}

#[test]
fn test_paper_cut_feeds_first() {
    // LF x3, GS V 0 / GS V 1
    assert_eq!(build(|b| { b.cut(false); }), [0x0A, 0x0A, 0x0A, 0x1D, 0x56, 0x00]);
    assert_eq!(build(|b| { b.cut(true); }), [0x0A, 0x0A, 0x0A, 0x1D, 0x56, 0x01]);
}

#[test]
fn test_beep_command_is_clamped() {
    // ESC B n t
    assert_eq!(build(|b| { b.beep(3, 2); }), [0x1B, 0x42, 3, 2]);
    assert_eq!(build(|b| { b.beep(0, 20); }), [0x1B, 0x42, 1, 9]);
}

#[test]
fn test_image_receipt_layout() {
    let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 4, Luma([0])));
    let out = format_image_receipt(&img, PaperWidth::Width80mm);

    let mut expected = vec![
        0x1B, 0x40, // init
        0x1B, 0x74, 13, // code page
        0x1B, 0x61, 0x01, // center
        0x1D, 0x76, 0x30, 0x00, 2, 0, 4, 0, // GS v 0, 2 bytes x 4 rows
    ];
    expected.extend_from_slice(&[0xFF; 8]);
    expected.extend_from_slice(&[
        0x1B, 0x61, 0x00, // left
        0x0A, 0x0A, 0x0A, 0x1D, 0x56, 0x00, // feed + cut
        0x1B, 0x42, 3, 2, // beep
    ]);

    assert_eq!(out, expected);
}

#[test]
fn test_wide_image_scaled_to_paper() {
    let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(768, 10, Luma([255])));
    let out = format_image_receipt(&img, PaperWidth::Width58mm);

    // 384 dots -> 48 bytes per row, height halved to 5
    let header = &out[8..16];
    assert_eq!(header, [0x1D, 0x76, 0x30, 0x00, 48, 0, 5, 0]);
}

#[test]
fn test_tall_image_split_into_bands() {
    let height = RASTER_BAND_ROWS + 44;
    let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, height, Luma([0])));
    let out = build(|b| {
        b.raster_image(&img, 576);
    });

    assert_eq!(&out[..8], [0x1D, 0x76, 0x30, 0x00, 1, 0, 0x00, 0x01]);
    let second = 8 + RASTER_BAND_ROWS as usize;
    assert_eq!(&out[second..second + 8], [0x1D, 0x76, 0x30, 0x00, 1, 0, 44, 0]);
    assert_eq!(out.len(), 16 + height as usize);
}

#[test]
fn test_transparent_pixels_print_white() {
    let mut rgba = RgbaImage::from_pixel(8, 1, Rgba([0, 0, 0, 0]));
    rgba.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
    let out = build(|b| {
        b.raster_image(&DynamicImage::ImageRgba8(rgba), 576);
    });

    assert_eq!(out[8], 0b1000_0000);
}

#[test]
fn test_paper_width_serde_names() {
    let width: PaperWidth = serde_json::from_str("\"58mm\"").unwrap();
    assert_eq!(width, PaperWidth::Width58mm);
    assert_eq!(serde_json::to_string(&PaperWidth::Width80mm).unwrap(), "\"80mm\"");
}
