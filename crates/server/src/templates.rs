//! Embedded gallery page.

use once_cell::sync::Lazy;
use tera::{Context, Tera};

pub static TEMPLATES: Lazy<Tera> = Lazy::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![("gallery.html", GALLERY_TEMPLATE)])
        .expect("Failed to load templates");
    tera
});

/// Render the gallery grid for `keys`, in the order given.
pub fn render_gallery(keys: &[String]) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("images", keys);
    TEMPLATES.render("gallery.html", &context)
}

const GALLERY_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Gallery</title>
    <link href="//maxcdn.bootstrapcdn.com/bootstrap/4.0.0/css/bootstrap.min.css" rel="stylesheet">
    <link href="//cdnjs.cloudflare.com/ajax/libs/fancybox/2.1.5/jquery.fancybox.min.css" rel="stylesheet" media="screen">
    <style>
        body {
            background-color: #1d1d1d !important;
            font-family: "Asap", sans-serif;
            color: #989898;
            margin: 10px;
            font-size: 16px;
        }
        .thumb { margin-bottom: 30px; }
        .page-top { margin-top: 85px; }
        img.zoom {
            width: 100%;
            height: 200px;
            border-radius: 5px;
            object-fit: cover;
            transition: all .3s ease-in-out;
        }
        .transition { transform: scale(1.2); }
    </style>
</head>
<body>
    <div class="container page-top">
        <form enctype="multipart/form-data" action="/" method="post">
            <div class="form-group">
                <label for="fromControlFile">Upload an image</label>
                <input type="file" name="myFile" class="form-control-file" id="fromControlFile">
            </div>
            <input type="submit" value="upload" class="btn btn-primary"/>
        </form>

        <div class="row">
        {% for key in images %}
            <div class="col-lg-3 col-md-4 col-xs-6 thumb">
                <a href="/{{ key | urlencode }}" class="fancybox" rel="lightbox">
                    <img src="/{{ key | urlencode }}" alt="{{ key }}" class="zoom img-fluid"/>
                </a>
            </div>
        {% endfor %}
        </div>
    </div>

    <script src="//cdnjs.cloudflare.com/ajax/libs/jquery/3.2.1/jquery.min.js"></script>
    <script src="//maxcdn.bootstrapcdn.com/bootstrap/4.0.0/js/bootstrap.min.js"></script>
    <script src="//cdnjs.cloudflare.com/ajax/libs/fancybox/2.1.5/jquery.fancybox.min.js"></script>
    <script>
    $(document).ready(function () {
        $(".fancybox").fancybox({ openEffect: "none", closeEffect: "none" });
        $(".zoom").hover(
            function () { $(this).addClass("transition"); },
            function () { $(this).removeClass("transition"); }
        );
    });
    </script>
</body>
</html>
"##;
