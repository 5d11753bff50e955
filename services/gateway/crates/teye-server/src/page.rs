//! Diagnostic console served on `GET /` in debug mode.

/// Static HTML console: a request editor, a send button and a log of
/// received events (errors in red).
pub const DEBUG_CONSOLE: &str = r#"<!doctype html>
<html>
<body>
<textarea id="message" style="width: 100%; height: 200px;">{
	"command": "",
	"args": {
	}
}
</textarea><br />
<button type="button" onclick="sendMessage()">Send</button><br />
<div id="console" style="background: black; color: lime; font-family: Courier New, Courier, monospace; height: 500px; overflow: auto;"></div>
<script>
  var scheme = location.protocol === "https:" ? "wss://" : "ws://";
  var ws = new WebSocket(scheme + location.host, "echo-protocol");
  function sendMessage() {
    ws.send(document.getElementById("message").value);
  }
  ws.addEventListener("message", function(e) {
    var msg = JSON.parse(e.data);
    var consoleDiv = document.getElementById("console");
    var line = document.createElement("span");
    line.style.color = msg.status === "error" ? "red" : "inherit";
    line.textContent = msg.msg;
    consoleDiv.appendChild(document.createElement("br"));
    consoleDiv.appendChild(line);
    consoleDiv.scrollTop = consoleDiv.scrollHeight;
  });
</script>
</body>
</html>
"#;
