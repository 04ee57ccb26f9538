/// Maps a Drive MIME type to the extension used to suffix downloaded
/// files. Unknown types get no suffix.
pub fn extension_for(mime_type: &str) -> Option<&'static str> {
    let extension = match mime_type {
        "text/plain" => "txt",
        "text/html" => "html",
        "text/css" => "css",
        "text/csv" => "csv",
        "application/json" => "json",
        "application/javascript" => "js",
        "application/xml" => "xml",

        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/webp" => "webp",

        "application/pdf" => "pdf",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/msword" => "doc",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.ms-powerpoint" => "ppt",

        "application/vnd.google-apps.document" => "gdoc",
        "application/vnd.google-apps.spreadsheet" => "gsheet",
        "application/vnd.google-apps.presentation" => "gslides",
        "application/vnd.google-apps.form" => "gform",
        "application/vnd.google-apps.drawing" => "gdraw",
        "application/vnd.google-apps.map" => "gmap",
        "application/vnd.google-apps.site" => "gsite",
        "application/vnd.google-apps.jam" => "gjam",

        "application/zip" => "zip",
        "application/x-rar-compressed" => "rar",
        "application/gzip" => "gz",
        "application/x-7z-compressed" => "7z",

        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/aac" => "aac",

        "video/mp4" => "mp4",
        "video/mpeg" => "mpeg",
        "video/webm" => "webm",
        "video/quicktime" => "mov",

        _ => return None,
    };
    Some(extension)
}
