const BUTTON_STYLE: &str = "display: inline-block; padding: 10px 20px; background: #6d28d9; color: white; text-decoration: none; border-radius: 4px;";

fn layout(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
{body}
</body>
</html>"#
    )
}

/// Minimal escaping for user-supplied names interpolated into HTML.
fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render_welcome(name: &str, base_url: &str) -> String {
    let name = escape(name);
    layout(&format!(
        r#"    <h2>Welcome to ProjectHub</h2>
    <p>Hi {name},</p>
    <p>Your account is ready. Create your first project or explore what the community is building.</p>
    <p><a href="{base_url}" style="{BUTTON_STYLE}">Open ProjectHub</a></p>"#
    ))
}

pub fn render_password_reset(reset_url: &str) -> String {
    layout(&format!(
        r#"    <h2>Password Reset</h2>
    <p>A password reset was requested for your ProjectHub account.</p>
    <p><a href="{reset_url}" style="{BUTTON_STYLE}">Reset Password</a></p>
    <p style="color: #666; font-size: 14px;">This link expires in 1 hour. If you didn't request this, you can ignore it.</p>"#
    ))
}

pub fn render_team_added(name: &str, project_name: &str, role: &str, project_url: &str) -> String {
    let name = escape(name);
    let project_name = escape(project_name);
    layout(&format!(
        r#"    <h2>You've joined {project_name}</h2>
    <p>Hi {name},</p>
    <p>You've been added to the <strong>{project_name}</strong> team as <strong>{role}</strong>.</p>
    <p><a href="{project_url}" style="{BUTTON_STYLE}">View Project</a></p>"#
    ))
}
