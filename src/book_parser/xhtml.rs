//! EPUB 各固定文档的文本模板。

use std::fmt::Write as _;

pub(crate) const MIMETYPE: &str = "application/epub+zip";

pub(crate) const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
    <rootfiles>
        <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
    </rootfiles>
</container>
"#;

/// 一页在包文档中的信息；`seq` 从 1 开始。
pub(crate) struct PageEntry<'a> {
    pub seq: usize,
    pub image_file: &'a str,
    pub media_type: &'static str,
}

impl PageEntry<'_> {
    pub(crate) fn doc_name(&self) -> String {
        format!("page{}.xhtml", self.seq)
    }
}

pub(crate) struct PackageMeta<'a> {
    pub title: &'a str,
    pub creator: &'a str,
    pub identifier: &'a str,
    pub date: &'a str,
}

pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// 包内相对引用：先百分号编码文件名，再做 XML 转义。
fn image_href(image_file: &str) -> String {
    escape_xml(&format!("images/{}", urlencoding::encode(image_file)))
}

/// 单页包装文档：图片居中铺满。
pub(crate) fn page_xhtml(seq: usize, image_file: &str) -> String {
    let src = image_href(image_file);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
    <title>Page {seq}</title>
    <style type="text/css">
        html, body {{ margin: 0; padding: 0; height: 100%; width: 100%; }}
        body {{ text-align: center; }}
        .page {{ display: flex; justify-content: center; align-items: center; height: 100vh; width: 100vw; }}
        img {{ max-width: 100%; max-height: 100%; width: auto; height: auto; object-fit: contain; }}
    </style>
</head>
<body>
    <div class="page">
        <img src="{src}" alt="Page {seq}"/>
    </div>
</body>
</html>
"#
    )
}

pub(crate) fn package_opf(meta: &PackageMeta<'_>, pages: &[PageEntry<'_>]) -> String {
    let mut manifest = String::new();
    let mut spine = String::new();
    for page in pages {
        let _ = writeln!(
            manifest,
            r#"        <item id="page{n}" href="{doc}" media-type="application/xhtml+xml"/>"#,
            n = page.seq,
            doc = page.doc_name(),
        );
        let _ = writeln!(
            manifest,
            r#"        <item id="img{n}" href="{href}" media-type="{mt}"/>"#,
            n = page.seq,
            href = image_href(page.image_file),
            mt = page.media_type,
        );
        let _ = writeln!(spine, r#"        <itemref idref="page{}"/>"#, page.seq);
    }
    let cover = if pages.is_empty() {
        ""
    } else {
        "        <meta name=\"cover\" content=\"img1\"/>\n"
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package version="2.0" xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id">
    <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
        <dc:title>{title}</dc:title>
        <dc:language>zh</dc:language>
        <dc:identifier id="book-id">{id}</dc:identifier>
        <dc:creator>{creator}</dc:creator>
        <dc:date>{date}</dc:date>
{cover}    </metadata>
    <manifest>
        <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
{manifest}    </manifest>
    <spine toc="ncx">
{spine}    </spine>
</package>
"#,
        title = escape_xml(meta.title),
        id = escape_xml(meta.identifier),
        creator = escape_xml(meta.creator),
        date = meta.date,
    )
}

pub(crate) fn toc_ncx(meta: &PackageMeta<'_>, pages: &[PageEntry<'_>]) -> String {
    let mut nav = String::new();
    for (order, page) in pages.iter().enumerate() {
        let order = order + 1;
        let _ = write!(
            nav,
            r#"        <navPoint id="nav{order}" playOrder="{order}">
            <navLabel><text>Page {seq}</text></navLabel>
            <content src="{doc}"/>
        </navPoint>
"#,
            seq = page.seq,
            doc = page.doc_name(),
        );
    }
    let count = pages.len();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx version="2005-1" xmlns="http://www.daisy.org/z3986/2005/ncx/">
    <head>
        <meta name="dtb:uid" content="{id}"/>
        <meta name="dtb:depth" content="1"/>
        <meta name="dtb:totalPageCount" content="{count}"/>
        <meta name="dtb:maxPageNumber" content="{count}"/>
    </head>
    <docTitle><text>{title}</text></docTitle>
    <navMap>
{nav}    </navMap>
</ncx>
"#,
        id = escape_xml(meta.identifier),
        title = escape_xml(meta.title),
    )
}
